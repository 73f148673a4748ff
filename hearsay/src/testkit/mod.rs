//! Pieces for running whole clusters inside one test process.

mod failure_config;
mod fixed_probes;
mod sim_network;

#[rustfmt::skip]
pub use {
  failure_config::FailureConfig,
  failure_config::FailureConfigMap,
  fixed_probes::FixedProbes,
  sim_network::SimNetwork,
};
