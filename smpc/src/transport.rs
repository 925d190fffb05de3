use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::expr::OpId;
use crate::tpg::{TpgError, TrustedParamGenerator};
use crate::MpcField;

/// Error type for bulletin-board operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportError {
    /// A broadcast address (sender, label) was written twice.
    Publish { label: String },
    /// A private address (recipient, label) was written twice.
    Send { recipient: String, label: String },
    /// A fetch cannot be served.
    Fetch { sender: String, label: String },
    /// The parameter generator refused a triple request.
    Triple(TpgError),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Publish { label } => write!(f, "Label {label} was already published"),
            Self::Send { recipient, label } => {
                write!(f, "Label {label} was already sent to {recipient}")
            }
            Self::Fetch { sender, label } => {
                write!(f, "Error while fetching {label} from {sender}")
            }
            Self::Triple(err) => err.fmt(f),
        }
    }
}

impl From<TpgError> for TransportError {
    fn from(err: TpgError) -> Self {
        TransportError::Triple(err)
    }
}

/// One party's handle to the bulletin board.
///
/// Messages are opaque byte strings. Broadcasts are addressed by
/// (sender, label) and private messages by (recipient, label); each
/// address is written at most once per run, and fetches resolve once the
/// addressed message is available. Triple requests are forwarded to the
/// session's trusted parameter generator, which answers with the three
/// decimal-encoded components of the caller's triple share.
#[async_trait]
pub trait BulletinBoard: Send + Sync {
    /// Id under which this handle publishes.
    fn client_id(&self) -> &str;

    /// Publish a message under the caller's id and `label`.
    async fn broadcast(&self, label: &str, msg: Vec<u8>) -> Result<(), TransportError>;

    /// Wait for the broadcast published by `sender_id` under `label`.
    async fn fetch_broadcast(&self, sender_id: &str, label: &str)
        -> Result<Vec<u8>, TransportError>;

    /// Deliver a message addressed to `recipient_id` under `label`.
    async fn send_private(
        &self,
        recipient_id: &str,
        label: &str,
        msg: Vec<u8>,
    ) -> Result<(), TransportError>;

    /// Wait for the private message addressed to the caller under `label`.
    async fn fetch_private(&self, label: &str) -> Result<Vec<u8>, TransportError>;

    /// Request this party's share of the Beaver triple for `op_id`.
    async fn fetch_triple(&self, op_id: &OpId) -> Result<[Vec<u8>; 3], TransportError>;
}

/// In-process bulletin board shared by all parties of one session.
///
/// Stands in for the external board service when everything runs inside
/// one process (tests, the local driver). Fetches await publication
/// through a shared notifier; a networked deployment would implement
/// [`BulletinBoard`] against a remote server instead.
pub struct LocalBoard<T> {
    state: Arc<BoardState>,
    tpg: Arc<TrustedParamGenerator<T>>,
}

struct BoardState {
    broadcasts: Mutex<HashMap<(String, String), Vec<u8>>>,
    mailboxes: Mutex<HashMap<(String, String), Vec<u8>>>,
    published: Notify,
}

impl<T: MpcField> LocalBoard<T> {
    pub fn new(tpg: Arc<TrustedParamGenerator<T>>) -> Self {
        LocalBoard {
            state: Arc::new(BoardState {
                broadcasts: Mutex::new(HashMap::new()),
                mailboxes: Mutex::new(HashMap::new()),
                published: Notify::new(),
            }),
            tpg,
        }
    }

    /// Handle bound to one participant id.
    pub fn client(&self, client_id: impl Into<String>) -> LocalBoardClient<T> {
        LocalBoardClient {
            state: Arc::clone(&self.state),
            tpg: Arc::clone(&self.tpg),
            client_id: client_id.into(),
        }
    }

    /// All (sender, label) addresses published so far, sorted.
    pub fn published_labels(&self) -> Vec<(String, String)> {
        let mut labels: Vec<_> = self
            .state
            .broadcasts
            .lock()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        labels.sort();
        labels
    }
}

/// [`BulletinBoard`] handle onto a [`LocalBoard`].
pub struct LocalBoardClient<T> {
    state: Arc<BoardState>,
    tpg: Arc<TrustedParamGenerator<T>>,
    client_id: String,
}

impl BoardState {
    fn store(
        map: &Mutex<HashMap<(String, String), Vec<u8>>>,
        key: (String, String),
        msg: Vec<u8>,
    ) -> bool {
        match map.lock().unwrap().entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(msg);
                true
            }
        }
    }

    async fn wait_for(
        &self,
        map: &Mutex<HashMap<(String, String), Vec<u8>>>,
        key: &(String, String),
    ) -> Vec<u8> {
        loop {
            // Register for wakeup before checking, so a publication racing
            // with the check cannot be missed.
            let notified = self.published.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(msg) = map.lock().unwrap().get(key) {
                return msg.clone();
            }
            notified.await;
        }
    }
}

#[async_trait]
impl<T: MpcField> BulletinBoard for LocalBoardClient<T> {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn broadcast(&self, label: &str, msg: Vec<u8>) -> Result<(), TransportError> {
        let key = (self.client_id.clone(), label.to_string());
        if !BoardState::store(&self.state.broadcasts, key, msg) {
            return Err(TransportError::Publish {
                label: label.to_string(),
            });
        }
        self.state.published.notify_waiters();
        Ok(())
    }

    async fn fetch_broadcast(
        &self,
        sender_id: &str,
        label: &str,
    ) -> Result<Vec<u8>, TransportError> {
        let key = (sender_id.to_string(), label.to_string());
        Ok(self.state.wait_for(&self.state.broadcasts, &key).await)
    }

    async fn send_private(
        &self,
        recipient_id: &str,
        label: &str,
        msg: Vec<u8>,
    ) -> Result<(), TransportError> {
        let key = (recipient_id.to_string(), label.to_string());
        if !BoardState::store(&self.state.mailboxes, key, msg) {
            return Err(TransportError::Send {
                recipient: recipient_id.to_string(),
                label: label.to_string(),
            });
        }
        self.state.published.notify_waiters();
        Ok(())
    }

    async fn fetch_private(&self, label: &str) -> Result<Vec<u8>, TransportError> {
        let key = (self.client_id.clone(), label.to_string());
        Ok(self.state.wait_for(&self.state.mailboxes, &key).await)
    }

    async fn fetch_triple(&self, op_id: &OpId) -> Result<[Vec<u8>; 3], TransportError> {
        let (a, b, c) = self.tpg.retrieve_triple(&self.client_id, op_id)?;
        Ok([
            a.0.to_decimal().into_bytes(),
            b.0.to_decimal().into_bytes(),
            c.0.to_decimal().into_bytes(),
        ])
    }
}
