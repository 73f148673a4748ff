//! Anti-entropy membership.
//!
//! On every tick the [`GossipService`] runs a [`Cycle`]: up to three targets are sampled (a seed,
//! a reachable peer, an unreachable peer) and a [`Round`] runs against each of them concurrently.
//! A round is three messages:
//!
//! 1. [`Syn`]: the initiator sends a digest of every peer it knows.
//! 2. [`SynAck`]: the target answers with the full records the initiator lacks or holds stale,
//!    and the digests of what the target lacks or holds stale itself.
//! 3. [`Ack`]: the initiator sends the full records the target asked for.
//!
//! Both sides decide what to send with the same [`Diff`]. Records are merged only when strictly
//! more recent, so two nodes holding the same heartbeat for a peer exchange nothing about it.

mod cycle;
mod diff;
mod merge;
mod messages;
mod outputs;
mod responder;
mod round;
mod service;

#[rustfmt::skip]
pub use {
  cycle::Cycle,
  cycle::select_peers,
  diff::Diff,
  diff::unknown_or_stale,
  merge::merge_discovered,
  messages::Ack,
  messages::Syn,
  messages::SynAck,
  outputs::CycleReport,
  outputs::RoundInbox,
  outputs::RoundOutputs,
  outputs::round_channels,
  responder::Responder,
  round::Round,
  service::GossipService,
};
