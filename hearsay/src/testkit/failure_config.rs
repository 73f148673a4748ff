use im::HashMap;
use serde::{Deserialize, Serialize};

/// How messages to one node fail.
#[derive(Default, Serialize, Deserialize, Clone, Copy, Debug)]
pub struct FailureConfig {
  /// Nothing answers: every message is unreachable.
  pub down: bool,
  /// The node answers, but with garbage: every message fails with a hard error.
  pub broken: bool,
  /// Probability for each message to be lost, which looks unreachable to the sender.
  pub drop_prob: f64,
}

/// Failure configuration of a simulated cluster, keyed by endpoint.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct FailureConfigMap {
  pub cluster_wide: FailureConfig,
  pub node_wide: HashMap<String, FailureConfig>,
}
impl FailureConfigMap {
  pub fn get(&self, endpoint: &str) -> &FailureConfig {
    self.node_wide.get(endpoint).unwrap_or(&self.cluster_wide)
  }
}
