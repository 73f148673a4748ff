//! Moves gossip messages between nodes.
//!
//! The round protocol only needs [`Transport`]. What matters to it is the split between
//! [`TransportError::Unreachable`], which is routine and never aborts a cycle, and every other
//! error, which is escalated.
//!
//! [`TcpTransport`] and [`serve`] are the network implementation: one TCP connection per message,
//! each way carrying one CBOR frame prefixed by its length as a big endian `u32`.

mod codec;
mod server;
mod tcp;

use crate::gossip::{Ack, Syn, SynAck};
use crate::peer::PeerIdentity;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[rustfmt::skip]
pub use {
  codec::decode,
  codec::encode,
  codec::read_frame,
  codec::write_frame,
  codec::MAX_FRAME_SIZE,
  server::serve,
  tcp::TcpTransport,
};

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
  /// The target did not answer. Expected and routine.
  #[error("peer unreachable: {0}")]
  Unreachable(String),
  #[error("cannot encode or decode a gossip message: {0}")]
  Codec(#[from] serde_cbor::Error),
  #[error("frame of {0} bytes exceeds the maximum frame size")]
  FrameTooLarge(usize),
  #[error(transparent)]
  Io(#[from] std::io::Error),
  /// The target answered, but refused or failed to handle the message.
  #[error("peer rejected the message: {0}")]
  Remote(String),
}
impl TransportError {
  pub fn is_unreachable(&self) -> bool {
    matches!(self, TransportError::Unreachable(_))
  }
}

#[async_trait]
pub trait Transport: Send + Sync {
  async fn send_syn(&self, target: &PeerIdentity, syn: Syn) -> Result<SynAck, TransportError>;

  async fn send_ack(&self, target: &PeerIdentity, ack: Ack) -> Result<(), TransportError>;
}

/// What the initiator of a round sends.
#[derive(Debug, Deserialize, Serialize)]
pub enum Request {
  Syn(Syn),
  Ack(Ack),
}

/// What the target of a round answers.
#[derive(Debug, Deserialize, Serialize)]
pub enum Response {
  SynAck(SynAck),
  AckReceived,
  Rejected(String),
}
