//! Typed messages, raw payloads and reply handles.

use crate::codec::{JsonCodec, MessageCodec};
use crate::error::{ActorError, CodecError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// A message an actor can receive.
///
/// `CATEGORY` is the stable routing key: handlers are registered per
/// category and frames carry it next to the encoded body.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Serialize, Deserialize)]
/// struct Deposit { amount: u64 }
///
/// impl Message for Deposit {
///     const CATEGORY: &'static str = "bank.deposit";
///     type Reply = u64;
/// }
/// ```
pub trait Message: Serialize + DeserializeOwned + Send + 'static {
    /// Routing key, unique per actor behavior.
    const CATEGORY: &'static str;

    /// Reply type returned by `call`.
    type Reply: Serialize + DeserializeOwned + Send + 'static;
}

/// Encoded message plus its routing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub category: String,
    pub body: Vec<u8>,
}

impl Payload {
    /// Build a payload from raw parts.
    pub fn new(category: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            category: category.into(),
            body,
        }
    }

    /// Encode a typed message.
    pub fn encode<M: Message>(msg: &M) -> Result<Self, CodecError> {
        Ok(Self {
            category: M::CATEGORY.to_string(),
            body: JsonCodec.encode(msg)?,
        })
    }
}

/// Decode a reply body for message type `M`.
pub fn decode_reply<M: Message>(body: &[u8]) -> Result<M::Reply, ActorError> {
    Ok(JsonCodec.decode(body)?)
}

/// Reply body or the failure of a call.
pub type ReplyResult = Result<Vec<u8>, ActorError>;

/// One-time reply channel of a `call`.
///
/// The first `respond` delivers; later attempts fail with
/// [`ActorError::AlreadyResponded`].
#[derive(Debug)]
pub struct ReplyHandle {
    tx: Option<oneshot::Sender<ReplyResult>>,
}

impl ReplyHandle {
    pub(crate) fn new(tx: oneshot::Sender<ReplyResult>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Create a handle with its receiving end.
    pub fn channel() -> (Self, oneshot::Receiver<Result<Vec<u8>, ActorError>>) {
        let (tx, rx) = oneshot::channel();
        (Self::new(tx), rx)
    }

    /// Deliver the reply.
    ///
    /// A caller that already gave up (timeout) is not an error: the reply is
    /// dropped and logged.
    pub fn respond(&mut self, result: Result<Vec<u8>, ActorError>) -> Result<(), ActorError> {
        let tx = self.tx.take().ok_or(ActorError::AlreadyResponded)?;
        if tx.send(result).is_err() {
            tracing::debug!("ReplyHandle::respond: caller dropped before reply");
        }
        Ok(())
    }

    /// Whether a reply was already delivered.
    pub fn is_responded(&self) -> bool {
        self.tx.is_none()
    }
}
