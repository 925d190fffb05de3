use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use itertools::Itertools;
use log::debug;
use tokio::time::{timeout_at, Instant};

use crate::expr::{Expression, OpId, ProtocolSpec, SecretId, SpecError};
use crate::sharing::{reconstruct, share, AdditiveShare};
use crate::transport::{BulletinBoard, TransportError};
use crate::MpcField;

/// Label of the input-ownership announcement.
const SECRET_IDS_LABEL: &str = "client_secrets_id";
/// Label of the final result share.
const RESULT_LABEL: &str = "computed_share";
/// Label prefixes of the opened Beaver masks, completed with the op id.
const MASK_X_PREFIX: &str = "mask_x:";
const MASK_Y_PREFIX: &str = "mask_y:";

/// Deadline applied to every blocking fetch unless overridden.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error during a protocol run. Every variant is fatal: the run aborts
/// without a result and may only be retried from scratch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PartyError {
    /// Malformed run parameters (unknown participant, unowned secret, ...).
    Config(String),
    /// The bulletin board failed an operation.
    Transport(TransportError),
    /// A blocking fetch exceeded the session deadline.
    Timeout,
    /// A peer sent something the protocol does not allow at this point.
    Protocol(String),
    /// Local invariant violated.
    Internal(String),
}

impl fmt::Display for PartyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Invalid configuration: {msg}"),
            Self::Transport(err) => err.fmt(f),
            Self::Timeout => write!(f, "Session deadline exceeded"),
            Self::Protocol(msg) => write!(f, "Protocol violation: {msg}"),
            Self::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl From<TransportError> for PartyError {
    fn from(err: TransportError) -> Self {
        PartyError::Transport(err)
    }
}

impl From<SpecError> for PartyError {
    fn from(err: SpecError) -> Self {
        PartyError::Config(err.to_string())
    }
}

/// One participant of an SMPC session.
///
/// [`run`](Self::run) drives the whole protocol: announce which inputs
/// this party owns, distribute additive shares of them, fold the
/// expression tree into a share of the result and open everyone's final
/// share. All parties of a session obtain the same cleartext value; no
/// party learns anything about the others' inputs beyond it.
pub struct SmcParty<T, B> {
    client_id: String,
    spec: ProtocolSpec<T>,
    values: HashMap<SecretId, T>,
    board: B,
    timeout: Duration,
    deadline: Instant,
    secret_ids_by_owner: HashMap<String, Vec<SecretId>>,
    local_shares: HashMap<SecretId, AdditiveShare<T>>,
    bytes_in: u64,
    bytes_out: u64,
}

impl<T, B> SmcParty<T, B>
where
    T: MpcField,
    B: BulletinBoard,
{
    /// Create a party around a board handle; the handle's client id is
    /// this party's identity.
    pub fn new(spec: ProtocolSpec<T>, values: HashMap<SecretId, T>, board: B) -> Self {
        SmcParty {
            client_id: board.client_id().to_string(),
            spec,
            values,
            board,
            timeout: DEFAULT_TIMEOUT,
            deadline: Instant::now() + DEFAULT_TIMEOUT,
            secret_ids_by_owner: HashMap::new(),
            local_shares: HashMap::new(),
            bytes_in: 0,
            bytes_out: 0,
        }
    }

    /// Replace the session deadline applied to every blocking fetch.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Bytes received from the board so far.
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Bytes handed to the board so far.
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    /// Execute one protocol run and return the reconstructed result.
    pub async fn run(&mut self) -> Result<T, PartyError> {
        self.deadline = Instant::now() + self.timeout;
        if self.spec.index_of(&self.client_id).is_none() {
            return Err(PartyError::Config(format!(
                "{} is not a declared participant",
                self.client_id
            )));
        }

        self.announce_inputs().await?;
        self.distribute_shares().await?;

        debug!("{}: evaluating expression", self.client_id);
        let expr = self.spec.expr.clone();
        let result_share = self.evaluate(&expr).await?;

        self.reveal(result_share).await
    }

    /// Tell everyone which secret ids this party holds values for, and
    /// learn the full ownership map from everyone's announcement.
    async fn announce_inputs(&mut self) -> Result<(), PartyError> {
        let announcement = self.values.keys().map(SecretId::as_str).join(",");
        debug!(
            "{}: announcing {} owned secrets",
            self.client_id,
            self.values.len()
        );
        self.publish(SECRET_IDS_LABEL, announcement.into_bytes())
            .await?;

        for owner in self.spec.participant_ids.clone() {
            let raw = self.fetch_published(&owner, SECRET_IDS_LABEL).await?;
            let text = String::from_utf8(raw).map_err(|_| {
                PartyError::Protocol(format!("announcement from {owner} is not UTF-8"))
            })?;
            let ids = if text.is_empty() {
                Vec::new()
            } else {
                text.split(',')
                    .map(SecretId::new)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|err| PartyError::Protocol(err.to_string()))?
            };
            self.secret_ids_by_owner.insert(owner, ids);
        }

        self.spec.validate_ownership(&self.secret_ids_by_owner)?;
        Ok(())
    }

    /// Split every owned input across all participants, then collect this
    /// party's share of every announced secret.
    async fn distribute_shares(&mut self) -> Result<(), PartyError> {
        let recipients = self.spec.participant_ids.clone();
        for (secret_id, value) in self.values.clone() {
            let shares = share(value, recipients.len(), &mut rand::thread_rng());
            for (recipient, piece) in recipients.iter().zip(shares) {
                self.send_private(recipient, secret_id.as_str(), piece)
                    .await?;
            }
        }

        for owner in recipients {
            for secret_id in self.secret_ids_by_owner[&owner].clone() {
                let raw = self.fetch_private_msg(secret_id.as_str()).await?;
                let piece = self.decode_element(&raw, secret_id.as_str())?;
                self.local_shares.insert(secret_id, AdditiveShare(piece));
            }
        }
        Ok(())
    }

    /// Fold the expression into this party's share of its value.
    ///
    /// Additions and subtractions are local; a scalar factor scales the
    /// other operand's share with no interaction; a product of two secret
    /// operands runs one Beaver multiplication. Boxing keeps the
    /// recursion compatible with async.
    fn evaluate<'a>(
        &'a mut self,
        expr: &'a Expression<T>,
    ) -> Pin<Box<dyn Future<Output = Result<AdditiveShare<T>, PartyError>> + Send + 'a>> {
        Box::pin(async move {
            match expr {
                Expression::Secret(id) => {
                    self.local_shares.get(id).copied().ok_or_else(|| {
                        PartyError::Internal(format!("no local share for secret {id}"))
                    })
                }
                Expression::Scalar(value) => self.scalar_share(*value),
                Expression::Add(lhs, rhs) => {
                    let left = self.evaluate(lhs).await?;
                    let right = self.evaluate(rhs).await?;
                    Ok(left + right)
                }
                Expression::Sub(lhs, rhs) => {
                    let left = self.evaluate(lhs).await?;
                    let right = self.evaluate(rhs).await?;
                    Ok(left - right)
                }
                Expression::Mul { op_id, lhs, rhs } => {
                    if let Expression::Scalar(value) = lhs.as_ref() {
                        return Ok(self.evaluate(rhs).await? * *value);
                    }
                    if let Expression::Scalar(value) = rhs.as_ref() {
                        return Ok(self.evaluate(lhs).await? * *value);
                    }
                    let x = self.evaluate(lhs).await?;
                    let y = self.evaluate(rhs).await?;
                    self.beaver_multiply(op_id, x, y).await
                }
            }
        })
    }

    /// Share of a public constant: the shares must sum to the constant
    /// across all parties, so the first party contributes it and everyone
    /// else contributes zero.
    fn scalar_share(&self, value: T) -> Result<AdditiveShare<T>, PartyError> {
        if self.self_index()? == 0 {
            Ok(AdditiveShare(value))
        } else {
            Ok(AdditiveShare::zero())
        }
    }

    /// Multiply two secret-shared operands with a Beaver triple: open the
    /// triple-masked operands and recombine locally into a product share.
    async fn beaver_multiply(
        &mut self,
        op_id: &OpId,
        x: AdditiveShare<T>,
        y: AdditiveShare<T>,
    ) -> Result<AdditiveShare<T>, PartyError> {
        debug!("{}: multiplication {}", self.client_id, op_id);
        let (a, b, c) = self.fetch_triple(op_id).await?;

        let label_x = format!("{MASK_X_PREFIX}{op_id}");
        let label_y = format!("{MASK_Y_PREFIX}{op_id}");
        self.publish(&label_x, (x - a).0.to_decimal().into_bytes())
            .await?;
        self.publish(&label_y, (y - b).0.to_decimal().into_bytes())
            .await?;

        let mut x_masks = Vec::new();
        let mut y_masks = Vec::new();
        for sender in self.spec.participant_ids.clone() {
            let raw = self.fetch_published(&sender, &label_x).await?;
            x_masks.push(AdditiveShare(self.decode_element(&raw, &label_x)?));
            let raw = self.fetch_published(&sender, &label_y).await?;
            y_masks.push(AdditiveShare(self.decode_element(&raw, &label_y)?));
        }

        // d and e open x - a and y - b; x and y stay hidden because a and
        // b are uniform.
        let d = reconstruct(x_masks);
        let e = reconstruct(y_masks);

        // x·y = (d + a)(e + b) = d·e + d·b + a·e + a·b, with the public
        // d·e term contributed by the first party alone.
        let mut product = c + a * e + b * d;
        if self.self_index()? == 0 {
            product = product + AdditiveShare(d * e);
        }
        Ok(product)
    }

    /// Open everyone's share of the result and reconstruct it.
    async fn reveal(&mut self, result_share: AdditiveShare<T>) -> Result<T, PartyError> {
        self.publish(RESULT_LABEL, result_share.0.to_decimal().into_bytes())
            .await?;

        let mut shares = Vec::new();
        for sender in self.spec.participant_ids.clone() {
            let raw = self.fetch_published(&sender, RESULT_LABEL).await?;
            shares.push(AdditiveShare(self.decode_element(&raw, RESULT_LABEL)?));
        }

        let result = reconstruct(shares);
        debug!(
            "{}: reconstructed result {}",
            self.client_id,
            result.to_decimal()
        );
        Ok(result)
    }

    fn self_index(&self) -> Result<usize, PartyError> {
        self.spec.index_of(&self.client_id).ok_or_else(|| {
            PartyError::Internal(format!("{} lost its participant index", self.client_id))
        })
    }

    fn decode_element(&self, raw: &[u8], context: &str) -> Result<T, PartyError> {
        std::str::from_utf8(raw)
            .ok()
            .and_then(T::from_decimal)
            .ok_or_else(|| PartyError::Protocol(format!("malformed field element under {context}")))
    }

    async fn publish(&mut self, label: &str, msg: Vec<u8>) -> Result<(), PartyError> {
        self.bytes_out += msg.len() as u64;
        Ok(self.board.broadcast(label, msg).await?)
    }

    async fn send_private(
        &mut self,
        recipient: &str,
        label: &str,
        piece: AdditiveShare<T>,
    ) -> Result<(), PartyError> {
        let msg = piece.0.to_decimal().into_bytes();
        self.bytes_out += msg.len() as u64;
        Ok(self.board.send_private(recipient, label, msg).await?)
    }

    async fn fetch_published(&mut self, sender: &str, label: &str) -> Result<Vec<u8>, PartyError> {
        let raw = timeout_at(self.deadline, self.board.fetch_broadcast(sender, label))
            .await
            .map_err(|_| PartyError::Timeout)??;
        self.bytes_in += raw.len() as u64;
        Ok(raw)
    }

    async fn fetch_private_msg(&mut self, label: &str) -> Result<Vec<u8>, PartyError> {
        let raw = timeout_at(self.deadline, self.board.fetch_private(label))
            .await
            .map_err(|_| PartyError::Timeout)??;
        self.bytes_in += raw.len() as u64;
        Ok(raw)
    }

    async fn fetch_triple(
        &mut self,
        op_id: &OpId,
    ) -> Result<(AdditiveShare<T>, AdditiveShare<T>, AdditiveShare<T>), PartyError> {
        let parts = timeout_at(self.deadline, self.board.fetch_triple(op_id))
            .await
            .map_err(|_| PartyError::Timeout)??;
        for part in &parts {
            self.bytes_in += part.len() as u64;
        }
        let [a, b, c] = parts;
        let context = format!("triple for {op_id}");
        Ok((
            AdditiveShare(self.decode_element(&a, &context)?),
            AdditiveShare(self.decode_element(&b, &context)?),
            AdditiveShare(self.decode_element(&c, &context)?),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::future::try_join_all;

    use crate::fields::Mersenne127;
    use crate::tpg::TrustedParamGenerator;
    use crate::transport::LocalBoard;

    use super::*;

    type Fp = Mersenne127;
    type Expr = Expression<Fp>;

    struct Session {
        spec: ProtocolSpec<Fp>,
        tpg: Arc<TrustedParamGenerator<Fp>>,
        board: LocalBoard<Fp>,
        inputs: Vec<(String, HashMap<SecretId, Fp>)>,
    }

    fn session(parties: Vec<(&str, Vec<(&SecretId, u64)>)>, expr: Expr) -> Session {
        let tpg = Arc::new(TrustedParamGenerator::seeded(7));
        let mut inputs = Vec::new();
        for (id, values) in parties {
            tpg.add_participant(id).unwrap();
            let values = values
                .into_iter()
                .map(|(secret_id, value)| (secret_id.clone(), Fp::from(value)))
                .collect();
            inputs.push((id.to_string(), values));
        }
        tpg.seal();

        let participant_ids = inputs.iter().map(|(id, _)| id.clone()).collect();
        Session {
            spec: ProtocolSpec::new(participant_ids, expr).unwrap(),
            board: LocalBoard::new(Arc::clone(&tpg)),
            tpg,
            inputs,
        }
    }

    async fn run_all(session: &Session) -> Vec<u128> {
        let runs = session.inputs.iter().map(|(id, values)| {
            let mut party = SmcParty::new(
                session.spec.clone(),
                values.clone(),
                session.board.client(id.clone()),
            );
            async move { party.run().await }
        });
        let results = try_join_all(runs).await.unwrap();
        results.into_iter().map(|value| value.canonical()).collect()
    }

    fn mask_broadcasts(session: &Session) -> Vec<(String, String)> {
        session
            .board
            .published_labels()
            .into_iter()
            .filter(|(_, label)| {
                label.starts_with(MASK_X_PREFIX) || label.starts_with(MASK_Y_PREFIX)
            })
            .collect()
    }

    #[tokio::test]
    async fn sums_private_inputs() {
        let (x, y, z) = (SecretId::random(), SecretId::random(), SecretId::random());
        let session = session(
            vec![
                ("alice", vec![(&x, 5)]),
                ("bob", vec![(&y, 7)]),
                ("carol", vec![(&z, 11)]),
            ],
            Expr::secret(&x) + Expr::secret(&y) + Expr::secret(&z),
        );
        assert_eq!(run_all(&session).await, vec![23, 23, 23]);
    }

    #[tokio::test]
    async fn subtracts_shares_and_scalars() {
        let (x, y) = (SecretId::random(), SecretId::random());
        let session = session(
            vec![("alice", vec![(&x, 10)]), ("bob", vec![(&y, 4)])],
            Expr::secret(&x) - Expr::secret(&y) - Expr::scalar(1u64),
        );
        assert_eq!(run_all(&session).await, vec![5, 5]);
    }

    #[tokio::test]
    async fn scalar_products_need_no_triple() {
        let x = SecretId::random();
        let session = session(
            vec![("alice", vec![(&x, 3)])],
            Expr::secret(&x) * Expr::scalar(100u64) + Expr::scalar(7u64),
        );
        assert_eq!(run_all(&session).await, vec![307]);
        assert_eq!(session.tpg.ops_generated(), 0);
        assert!(mask_broadcasts(&session).is_empty());
    }

    #[tokio::test]
    async fn multiplies_two_secrets_with_one_triple() {
        let (x, y) = (SecretId::random(), SecretId::random());
        let session = session(
            vec![("alice", vec![(&x, 6)]), ("bob", vec![(&y, 7)])],
            Expr::secret(&x) * Expr::secret(&y),
        );
        assert_eq!(run_all(&session).await, vec![42, 42]);
        assert_eq!(session.tpg.ops_generated(), 1);

        // Every party opens exactly one mask per operand of the single
        // multiplication.
        let masks = mask_broadcasts(&session);
        assert_eq!(masks.len(), 4);
        for id in ["alice", "bob"] {
            let per_party = masks.iter().filter(|(sender, _)| sender == id).count();
            assert_eq!(per_party, 2);
        }
    }

    #[tokio::test]
    async fn evaluates_the_hospital_cost_expression() {
        let ids: Vec<SecretId> = (0..6).map(|_| SecretId::random()).collect();
        let (np1, at1, np2, at2, np3, at3) =
            (&ids[0], &ids[1], &ids[2], &ids[3], &ids[4], &ids[5]);
        let expr = (Expr::secret(np1) * Expr::secret(at1)
            + Expr::secret(np2) * Expr::secret(at2)
            + Expr::secret(np3) * Expr::secret(at3))
            * Expr::scalar(1500u64)
            - Expr::scalar(200u64);
        let session = session(
            vec![
                ("H1", vec![(np1, 1500), (at1, 3)]),
                ("H2", vec![(np2, 2000), (at2, 4)]),
                ("H3", vec![(np3, 800), (at3, 3)]),
            ],
            expr,
        );
        assert_eq!(run_all(&session).await, vec![22_349_800; 3]);
        assert_eq!(session.tpg.ops_generated(), 3);
    }

    #[tokio::test]
    async fn chains_dependent_multiplications() {
        let (x, y, z) = (SecretId::random(), SecretId::random(), SecretId::random());
        let session = session(
            vec![
                ("alice", vec![(&x, 2)]),
                ("bob", vec![(&y, 3)]),
                ("carol", vec![(&z, 5)]),
            ],
            (Expr::secret(&x) * Expr::secret(&y)) * Expr::secret(&z),
        );
        assert_eq!(run_all(&session).await, vec![30, 30, 30]);
        assert_eq!(session.tpg.ops_generated(), 2);
    }

    #[tokio::test]
    async fn identity_scalars_change_nothing() {
        let (x, y) = (SecretId::random(), SecretId::random());
        let expr = (Expr::secret(&x) + Expr::scalar(0u64))
            * (Expr::secret(&y) * Expr::scalar(1u64))
            + Expr::scalar(0u64);
        let session = session(
            vec![("alice", vec![(&x, 6)]), ("bob", vec![(&y, 7)])],
            expr,
        );
        assert_eq!(run_all(&session).await, vec![42, 42]);
        assert_eq!(session.tpg.ops_generated(), 1);
    }

    #[tokio::test]
    async fn single_party_sessions_work() {
        let x = SecretId::random();
        let session = session(
            vec![("alice", vec![(&x, 37)])],
            Expr::secret(&x) + Expr::scalar(5u64),
        );
        assert_eq!(run_all(&session).await, vec![42]);
    }

    #[tokio::test]
    async fn missing_peer_times_out() {
        let x = SecretId::random();
        let session = session(
            vec![("alice", vec![(&x, 1)])],
            Expr::secret(&x),
        );
        let spec = ProtocolSpec::new(
            vec!["alice".to_string(), "bob".to_string()],
            session.spec.expr.clone(),
        )
        .unwrap();

        let (_, values) = &session.inputs[0];
        let mut party =
            SmcParty::new(spec, values.clone(), session.board.client("alice"))
                .with_timeout(Duration::from_millis(100));

        assert_eq!(party.run().await, Err(PartyError::Timeout));
    }

    #[tokio::test]
    async fn garbage_from_a_peer_is_a_protocol_violation() {
        let x = SecretId::random();
        let tpg = Arc::new(TrustedParamGenerator::<Fp>::seeded(7));
        tpg.add_participant("alice").unwrap();
        tpg.add_participant("bob").unwrap();
        tpg.seal();
        let board = LocalBoard::new(tpg);
        let spec = ProtocolSpec::new(
            vec!["alice".to_string(), "bob".to_string()],
            Expr::secret(&x),
        )
        .unwrap();

        // Bob follows the announcement and distribution steps but opens a
        // share that is not a field element.
        let bob = board.client("bob");
        bob.broadcast(SECRET_IDS_LABEL, Vec::new()).await.unwrap();
        bob.broadcast(RESULT_LABEL, b"not a number".to_vec())
            .await
            .unwrap();

        let mut values = HashMap::new();
        values.insert(x, Fp::from(9));
        let mut alice = SmcParty::new(spec, values, board.client("alice"));
        let outcome = alice.run().await;
        assert!(matches!(outcome, Err(PartyError::Protocol(_))));
    }

    #[tokio::test]
    async fn undeclared_parties_cannot_run() {
        let session = session(vec![("alice", vec![])], Expr::scalar(1u64));
        let mut outsider = SmcParty::new(
            session.spec.clone(),
            HashMap::new(),
            session.board.client("mallory"),
        );
        assert!(matches!(
            outsider.run().await,
            Err(PartyError::Config(_))
        ));
    }
}
