use crate::store::RepositoryError;
use crate::transport::TransportError;

/// Errors that end a round, a cycle or a tick.
///
/// An unreachable peer is not one of them: rounds report it on their `unreachable` output and
/// succeed.
#[derive(thiserror::Error, Debug)]
pub enum GossipError {
  #[error("no seed peers configured")]
  EmptySeed,
  #[error(transparent)]
  Transport(#[from] TransportError),
  #[error(transparent)]
  Repository(#[from] RepositoryError),
  #[error("gossip round panicked: {0}")]
  RoundPanicked(String),
}
