//! `hearsay` keeps every node of a peer-to-peer cluster informed about every other node, without
//! any central directory. Nodes gossip digests of what they know with a few random peers on each
//! tick and exchange full records only where their views differ.
//!
//! The protocol lives in [`gossip`]. Its collaborators are traits injected at construction:
//! [`store::Repository`] holds the peer table, [`transport::Transport`] moves messages,
//! [`notify::Notifier`] hears about merged peers and [`status::HealthProbes`] feeds the health
//! status each node announces.

pub mod config;
pub mod error;
pub mod gossip;
pub mod notify;
pub mod peer;
pub mod status;
pub mod store;
pub mod testkit;
pub mod transport;

pub use error::GossipError;
