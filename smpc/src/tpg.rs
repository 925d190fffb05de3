use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::expr::OpId;
use crate::sharing::{share, AdditiveShare};
use crate::MpcField;

/// Error returned by the trusted parameter generator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TpgError {
    /// Triple requested by an id that was never registered.
    UnknownParticipant(String),
    /// Triple requested before the participant set was sealed.
    NotReady,
    /// Participant registered after the set was sealed.
    AlreadySealed,
}

impl fmt::Display for TpgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownParticipant(id) => write!(f, "Unknown participant {id}"),
            Self::NotReady => write!(f, "Participant set is not sealed yet"),
            Self::AlreadySealed => write!(f, "Participant set is already sealed"),
        }
    }
}

/// One party's portion of a Beaver triple (a, b, c) with a·b = c.
pub type TripleShares<T> = (AdditiveShare<T>, AdditiveShare<T>, AdditiveShare<T>);

/// Trusted third party producing correlated randomness for multiplication
/// gates.
///
/// The first request for an op id draws a uniform pair (a, b), sets
/// c = a·b and splits all three across the registered participants; every
/// requester, concurrent or later, observes the same cached sharing.
/// Reads are idempotent per (participant, op id).
pub struct TrustedParamGenerator<T> {
    state: Mutex<TpgState<T>>,
}

struct TpgState<T> {
    participant_ids: Vec<String>,
    sealed: bool,
    triples: HashMap<OpId, HashMap<String, TripleShares<T>>>,
    rng: SmallRng,
}

impl<T: MpcField> TrustedParamGenerator<T> {
    /// Create a generator seeded from operating-system entropy.
    pub fn new() -> Self {
        Self::with_rng(SmallRng::from_entropy())
    }

    /// Create a deterministic generator, for tests.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(SmallRng::seed_from_u64(seed))
    }

    fn with_rng(rng: SmallRng) -> Self {
        TrustedParamGenerator {
            state: Mutex::new(TpgState {
                participant_ids: Vec::new(),
                sealed: false,
                triples: HashMap::new(),
                rng,
            }),
        }
    }

    /// Register a participant. Registration order is the canonical share
    /// indexing order; registering twice is a no-op.
    pub fn add_participant(&self, id: impl Into<String>) -> Result<(), TpgError> {
        let mut state = self.state.lock().unwrap();
        if state.sealed {
            return Err(TpgError::AlreadySealed);
        }
        let id = id.into();
        if !state.participant_ids.contains(&id) {
            state.participant_ids.push(id);
        }
        Ok(())
    }

    /// Freeze the participant set. Triple requests are rejected until the
    /// set is sealed.
    pub fn seal(&self) {
        self.state.lock().unwrap().sealed = true;
    }

    /// This participant's share of the Beaver triple for `op_id`.
    pub fn retrieve_triple(
        &self,
        client_id: &str,
        op_id: &OpId,
    ) -> Result<TripleShares<T>, TpgError> {
        let mut state = self.state.lock().unwrap();
        if !state.sealed {
            return Err(TpgError::NotReady);
        }
        if !state.participant_ids.iter().any(|id| id == client_id) {
            return Err(TpgError::UnknownParticipant(client_id.to_string()));
        }

        // Generation happens at most once per op id; the lock makes the
        // first requester the single writer.
        if !state.triples.contains_key(op_id) {
            let n = state.participant_ids.len();
            let a = T::random(&mut state.rng);
            let b = T::random(&mut state.rng);
            let c = a * b;
            let a_shares = share(a, n, &mut state.rng);
            let b_shares = share(b, n, &mut state.rng);
            let c_shares = share(c, n, &mut state.rng);
            let per_party = state
                .participant_ids
                .iter()
                .cloned()
                .enumerate()
                .map(|(idx, id)| (id, (a_shares[idx], b_shares[idx], c_shares[idx])))
                .collect();
            state.triples.insert(op_id.clone(), per_party);
        }

        match state
            .triples
            .get(op_id)
            .and_then(|per_party| per_party.get(client_id))
        {
            Some(&triple) => Ok(triple),
            None => Err(TpgError::UnknownParticipant(client_id.to_string())),
        }
    }

    /// Number of distinct multiplication gates served so far.
    pub fn ops_generated(&self) -> usize {
        self.state.lock().unwrap().triples.len()
    }
}
