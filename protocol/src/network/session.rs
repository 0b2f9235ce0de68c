//! Point-to-point sessions between two participants.
//!
//! A session is a pair of bounded channels carrying bincode-encoded
//! [`Frame`]s. Each protocol run opens its own sessions, so messages from
//! different runs never interleave. Within a session, order is preserved.

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

use super::messages::{ErrorKind, Frame, WireMessage};
use crate::config::WIRE_PROTOCOL_VERSION;
use crate::identity::Party;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The counterparty dropped its end of the session.
    #[error("session with {counterparty} closed")]
    Closed { counterparty: String },

    #[error("frame codec error: {0}")]
    Codec(String),

    #[error("peer speaks wire version {got}, expected {expected}")]
    VersionMismatch { expected: u16, got: u16 },

    /// The counterparty answered with an error frame.
    #[error("{counterparty} reported {kind:?}: {message}")]
    Remote {
        counterparty: String,
        kind: ErrorKind,
        message: String,
    },

    #[error("no route to {0}")]
    UnknownParty(String),
}

/// One end of a session.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    protocol: String,
    me: Party,
    counterparty: Party,
    outbound: mpsc::Sender<Vec<u8>>,
    inbound: mpsc::Receiver<Vec<u8>>,
}

impl Session {
    /// Create both ends of a session between `initiator` and `responder`.
    pub fn pair(protocol: &str, initiator: Party, responder: Party, capacity: usize) -> (Session, Session) {
        let id = Uuid::new_v4();
        let (to_responder, from_initiator) = mpsc::channel(capacity);
        let (to_initiator, from_responder) = mpsc::channel(capacity);
        let initiating = Session {
            id,
            protocol: protocol.to_string(),
            me: initiator.clone(),
            counterparty: responder.clone(),
            outbound: to_responder,
            inbound: from_responder,
        };
        let responding = Session {
            id,
            protocol: protocol.to_string(),
            me: responder,
            counterparty: initiator,
            outbound: to_initiator,
            inbound: from_initiator,
        };
        (initiating, responding)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn counterparty(&self) -> &Party {
        &self.counterparty
    }

    fn closed(&self) -> SessionError {
        SessionError::Closed {
            counterparty: self.counterparty.name.clone(),
        }
    }

    async fn send_frame(&self, frame: &Frame) -> Result<(), SessionError> {
        let bytes = bincode::serialize(frame).map_err(|e| SessionError::Codec(e.to_string()))?;
        self.outbound.send(bytes).await.map_err(|_| self.closed())
    }

    pub async fn send(&self, message: WireMessage) -> Result<(), SessionError> {
        trace!(
            session = %self.id,
            from = %self.me,
            to = %self.counterparty,
            message = message.name(),
            "send"
        );
        self.send_frame(&Frame::payload(message)).await
    }

    /// Report a failure to the counterparty.
    pub async fn send_error(&self, kind: ErrorKind, message: impl Into<String>) -> Result<(), SessionError> {
        self.send_frame(&Frame::Error {
            kind,
            message: message.into(),
        })
        .await
    }

    /// Wait for the next message. An error frame from the counterparty
    /// becomes [`SessionError::Remote`].
    pub async fn receive(&mut self) -> Result<WireMessage, SessionError> {
        let bytes = self.inbound.recv().await.ok_or_else(|| self.closed())?;
        let frame: Frame = bincode::deserialize(&bytes).map_err(|e| SessionError::Codec(e.to_string()))?;
        match frame {
            Frame::Payload { version, message } => {
                if version != WIRE_PROTOCOL_VERSION {
                    return Err(SessionError::VersionMismatch {
                        expected: WIRE_PROTOCOL_VERSION,
                        got: version,
                    });
                }
                trace!(session = %self.id, from = %self.counterparty, message = message.name(), "receive");
                Ok(message)
            }
            Frame::Error { kind, message } => Err(SessionError::Remote {
                counterparty: self.counterparty.name.clone(),
                kind,
                message,
            }),
        }
    }

    pub async fn send_and_receive(&mut self, message: WireMessage) -> Result<WireMessage, SessionError> {
        self.send(message).await?;
        self.receive().await
    }
}
