use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use serde::Deserialize;
use smpc::expr::{Expression, ProtocolSpec, SecretId};
use smpc::MpcField;

/// Error while loading a session description.
#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Parse(serde_json::Error),
    NoParties,
    DuplicateSecret(String),
    UnknownSecret(String),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => err.fmt(f),
            Self::Parse(err) => err.fmt(f),
            Self::NoParties => write!(f, "Session declares no parties"),
            Self::DuplicateSecret(name) => write!(f, "Secret {name} declared twice"),
            Self::UnknownSecret(name) => {
                write!(f, "Expression references undeclared secret {name}")
            }
            Self::Invalid(msg) => f.write_str(msg),
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

/// Validated description of one session.
#[derive(Clone, Debug)]
pub struct SessionConfig<T> {
    pub spec: ProtocolSpec<T>,
    /// Per-party cleartext inputs, in participant order.
    pub inputs: Vec<HashMap<SecretId, T>>,
}

#[derive(Clone, Debug, Deserialize)]
struct RawSession {
    parties: Vec<RawParty>,
    expression: RawExpression,
}

#[derive(Clone, Debug, Deserialize)]
struct RawParty {
    id: String,
    #[serde(default)]
    inputs: HashMap<String, u64>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawExpression {
    Secret(String),
    Scalar(u64),
    Add(Box<RawExpression>, Box<RawExpression>),
    Sub(Box<RawExpression>, Box<RawExpression>),
    Mul(Box<RawExpression>, Box<RawExpression>),
}

/// Load and validate a session description from a JSON file.
pub fn load<T: MpcField>(path: impl AsRef<Path>) -> Result<SessionConfig<T>, ConfigError> {
    let text = fs::read_to_string(path)?;
    from_json(&text)
}

/// Parse a session description from a JSON string.
pub fn from_json<T: MpcField>(json: &str) -> Result<SessionConfig<T>, ConfigError> {
    convert(serde_json::from_str(json)?)
}

fn convert<T: MpcField>(raw: RawSession) -> Result<SessionConfig<T>, ConfigError> {
    if raw.parties.is_empty() {
        return Err(ConfigError::NoParties);
    }

    // Secret names double as wire ids, so they must be unique across the
    // whole session, not just within one party.
    let mut ids: HashMap<String, SecretId> = HashMap::new();
    let mut inputs = Vec::new();
    for party in &raw.parties {
        let mut values = HashMap::new();
        for (name, &value) in &party.inputs {
            if ids.contains_key(name) {
                return Err(ConfigError::DuplicateSecret(name.clone()));
            }
            let secret_id = SecretId::new(name.clone())
                .map_err(|err| ConfigError::Invalid(err.to_string()))?;
            ids.insert(name.clone(), secret_id.clone());
            values.insert(secret_id, T::from(value));
        }
        inputs.push(values);
    }

    let expr = build_expression(&raw.expression, &ids)?;
    let participant_ids = raw.parties.iter().map(|party| party.id.clone()).collect();
    let spec = ProtocolSpec::new(participant_ids, expr)
        .map_err(|err| ConfigError::Invalid(err.to_string()))?;

    let owners: HashMap<String, Vec<SecretId>> = spec
        .participant_ids
        .iter()
        .zip(&inputs)
        .map(|(id, values)| (id.clone(), values.keys().cloned().collect()))
        .collect();
    spec.validate_ownership(&owners)
        .map_err(|err| ConfigError::Invalid(err.to_string()))?;

    Ok(SessionConfig { spec, inputs })
}

fn build_expression<T: MpcField>(
    raw: &RawExpression,
    ids: &HashMap<String, SecretId>,
) -> Result<Expression<T>, ConfigError> {
    Ok(match raw {
        RawExpression::Secret(name) => Expression::secret(
            ids.get(name)
                .ok_or_else(|| ConfigError::UnknownSecret(name.clone()))?,
        ),
        RawExpression::Scalar(value) => Expression::scalar(*value),
        RawExpression::Add(lhs, rhs) => {
            build_expression(lhs, ids)? + build_expression(rhs, ids)?
        }
        RawExpression::Sub(lhs, rhs) => {
            build_expression(lhs, ids)? - build_expression(rhs, ids)?
        }
        RawExpression::Mul(lhs, rhs) => {
            build_expression(lhs, ids)? * build_expression(rhs, ids)?
        }
    })
}

#[cfg(test)]
mod tests {
    use smpc::fields::Mersenne127;

    use super::*;

    #[test]
    fn parses_a_two_party_session() {
        let session = from_json::<Mersenne127>(
            r#"{
                "parties": [
                    { "id": "alice", "inputs": { "x": 6 } },
                    { "id": "bob", "inputs": { "y": 7 } }
                ],
                "expression": { "mul": [ { "secret": "x" }, { "secret": "y" } ] }
            }"#,
        )
        .unwrap();

        assert_eq!(session.spec.participant_ids, vec!["alice", "bob"]);
        assert_eq!(session.inputs.len(), 2);
        assert_eq!(session.spec.expr.mul_op_ids().len(), 1);
        assert_eq!(session.spec.expr.referenced_secrets().len(), 2);
    }

    #[test]
    fn rejects_undeclared_secrets() {
        let outcome = from_json::<Mersenne127>(
            r#"{
                "parties": [ { "id": "alice", "inputs": { "x": 1 } } ],
                "expression": { "secret": "ghost" }
            }"#,
        );
        assert!(matches!(outcome, Err(ConfigError::UnknownSecret(_))));
    }

    #[test]
    fn rejects_secrets_declared_by_two_parties() {
        let outcome = from_json::<Mersenne127>(
            r#"{
                "parties": [
                    { "id": "alice", "inputs": { "x": 1 } },
                    { "id": "bob", "inputs": { "x": 2 } }
                ],
                "expression": { "secret": "x" }
            }"#,
        );
        assert!(matches!(outcome, Err(ConfigError::DuplicateSecret(_))));
    }

    #[test]
    fn parties_without_inputs_are_allowed() {
        let session = from_json::<Mersenne127>(
            r#"{
                "parties": [
                    { "id": "alice", "inputs": { "x": 1 } },
                    { "id": "observer" }
                ],
                "expression": { "add": [ { "secret": "x" }, { "scalar": 41 } ] }
            }"#,
        )
        .unwrap();
        assert!(session.inputs[1].is_empty());
    }
}
