//! How a node judges its own health.
//!
//! Once per tick, before gossiping, [`StatusEvaluator::refresh`] runs the [`HealthProbes`] and
//! rewrites the application state of the owned peer. Other peers learn the result through gossip.

mod evaluator;
mod probes;
pub mod sntp;

#[rustfmt::skip]
pub use {
  evaluator::decide,
  evaluator::seed_average,
  evaluator::ProbeResults,
  evaluator::StatusEvaluator,
  probes::HealthProbes,
  probes::ProbeError,
  probes::Resources,
  probes::SystemProbes,
};
