//! # Network Module
//!
//! Session plumbing between participants. Protocols talk over
//! point-to-point sessions; nothing is broadcast and nothing is shared.
//!
//! ## Architecture
//!
//! ```text
//! messages.rs — WireMessage payloads, error kinds, frames
//! session.rs  — One end of a bincode-framed, ordered channel pair
//! node.rs     — A participant, its services and its responder dispatcher
//! mock.rs     — In-process network of nodes sharing a notary and clock
//! ```
//!
//! ## Dispatch
//!
//! `Node::initiate` drops the far end of a new session into the
//! counterparty's inbox. The counterparty's dispatcher looks up the
//! [`FlowResponder`] registered for the protocol name and runs it in its
//! own task. A responder that fails reports its [`ErrorKind`] back over
//! the session before the session is dropped.

pub mod messages;
pub mod mock;
pub mod node;
pub mod session;

pub use messages::{ErrorKind, Frame, TransactionRole, WireMessage};
pub use mock::MockNetwork;
pub use node::{Directory, FlowResponder, IncomingSession, Node, NodeServices};
pub use session::{Session, SessionError};
