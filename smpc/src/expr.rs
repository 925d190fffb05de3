use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::{Add, Mul, Sub};

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::MpcField;

/// Length of generated secret and multiplication ids.
const ID_LEN: usize = 16;

fn random_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LEN)
        .map(char::from)
        .collect()
}

/// Malformed protocol parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpecError {
    InvalidSecretId(String),
    NoParticipants,
    DuplicateParticipant(String),
    DuplicateSecretOwner(SecretId),
    UnknownSecret(SecretId),
}

impl fmt::Display for SpecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSecretId(id) => write!(f, "Invalid secret id {id:?}"),
            Self::NoParticipants => write!(f, "Participant list is empty"),
            Self::DuplicateParticipant(id) => write!(f, "Participant {id} declared twice"),
            Self::DuplicateSecretOwner(id) => write!(f, "Secret {id} has more than one owner"),
            Self::UnknownSecret(id) => write!(f, "Secret {id} is not owned by any participant"),
        }
    }
}

/// Identifier of a declared private input.
///
/// Opaque, globally unique, compared by equality. The comma is reserved as
/// the announcement delimiter and cannot appear in an id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SecretId(String);

impl SecretId {
    /// Mint a fresh random id.
    pub fn random() -> Self {
        SecretId(random_id())
    }

    /// Wrap an externally supplied id.
    pub fn new(id: impl Into<String>) -> Result<Self, SpecError> {
        let id = id.into();
        if id.is_empty() || id.contains(',') {
            return Err(SpecError::InvalidSecretId(id));
        }
        Ok(SecretId(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one multiplication gate, used by all parties to request
/// matching Beaver triples.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OpId(String);

impl OpId {
    /// Mint a fresh random id.
    pub fn random() -> Self {
        OpId(random_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Arithmetic expression over private inputs and public scalars.
///
/// Trees are built once, before the run, and every party holds the same
/// tree; multiplication gates carry the op id assigned at construction.
/// The `+`, `-` and `*` operators build nodes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expression<T> {
    Secret(SecretId),
    Scalar(T),
    Add(Box<Expression<T>>, Box<Expression<T>>),
    Sub(Box<Expression<T>>, Box<Expression<T>>),
    Mul {
        op_id: OpId,
        lhs: Box<Expression<T>>,
        rhs: Box<Expression<T>>,
    },
}

impl<T: MpcField> Expression<T> {
    /// Leaf referencing a declared private input.
    pub fn secret(id: &SecretId) -> Self {
        Expression::Secret(id.clone())
    }

    /// Leaf embedding a public constant.
    pub fn scalar(value: impl Into<T>) -> Self {
        Expression::Scalar(value.into())
    }

    /// Ids of all secrets referenced by this expression.
    pub fn referenced_secrets(&self) -> HashSet<SecretId> {
        let mut out = HashSet::new();
        self.visit(&mut |node| {
            if let Expression::Secret(id) = node {
                out.insert(id.clone());
            }
        });
        out
    }

    /// Ids of all multiplication gates in this expression.
    pub fn mul_op_ids(&self) -> Vec<OpId> {
        let mut out = Vec::new();
        self.visit(&mut |node| {
            if let Expression::Mul { op_id, .. } = node {
                out.push(op_id.clone());
            }
        });
        out
    }

    fn visit(&self, f: &mut impl FnMut(&Expression<T>)) {
        f(self);
        match self {
            Expression::Secret(_) | Expression::Scalar(_) => {}
            Expression::Add(lhs, rhs) | Expression::Sub(lhs, rhs) => {
                lhs.visit(f);
                rhs.visit(f);
            }
            Expression::Mul { lhs, rhs, .. } => {
                lhs.visit(f);
                rhs.visit(f);
            }
        }
    }
}

impl<T: MpcField> Add for Expression<T> {
    type Output = Expression<T>;
    fn add(self, rhs: Self) -> Self::Output {
        Expression::Add(Box::new(self), Box::new(rhs))
    }
}

impl<T: MpcField> Sub for Expression<T> {
    type Output = Expression<T>;
    fn sub(self, rhs: Self) -> Self::Output {
        Expression::Sub(Box::new(self), Box::new(rhs))
    }
}

impl<T: MpcField> Mul for Expression<T> {
    type Output = Expression<T>;
    fn mul(self, rhs: Self) -> Self::Output {
        Expression::Mul {
            op_id: OpId::random(),
            lhs: Box::new(self),
            rhs: Box::new(rhs),
        }
    }
}

/// Agreed parameters of one protocol run: the participant ordering and the
/// expression to evaluate. The position of a participant in the list is
/// its canonical index; the party at index 0 absorbs public constants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolSpec<T> {
    pub participant_ids: Vec<String>,
    pub expr: Expression<T>,
}

impl<T: MpcField> ProtocolSpec<T> {
    pub fn new(participant_ids: Vec<String>, expr: Expression<T>) -> Result<Self, SpecError> {
        if participant_ids.is_empty() {
            return Err(SpecError::NoParticipants);
        }
        let mut seen = HashSet::new();
        for id in &participant_ids {
            if !seen.insert(id) {
                return Err(SpecError::DuplicateParticipant(id.clone()));
            }
        }
        Ok(ProtocolSpec {
            participant_ids,
            expr,
        })
    }

    /// Canonical index of a participant, if declared.
    pub fn index_of(&self, client_id: &str) -> Option<usize> {
        self.participant_ids.iter().position(|id| id == client_id)
    }

    /// Check an ownership map against the expression: every referenced
    /// secret must be owned by exactly one participant, and no secret may
    /// be announced by two owners.
    pub fn validate_ownership(
        &self,
        owners: &HashMap<String, Vec<SecretId>>,
    ) -> Result<(), SpecError> {
        let mut owned = HashSet::new();
        for ids in owners.values() {
            for id in ids {
                if !owned.insert(id.clone()) {
                    return Err(SpecError::DuplicateSecretOwner(id.clone()));
                }
            }
        }
        for id in self.expr.referenced_secrets() {
            if !owned.contains(&id) {
                return Err(SpecError::UnknownSecret(id));
            }
        }
        Ok(())
    }
}
