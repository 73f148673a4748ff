use crate::status::{HealthProbes, ProbeError, Resources};
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};

/// Health probes with scripted answers.
pub struct FixedProbes {
  processes_ok: bool,
  internet_ok: bool,
  ntp_offset: Option<i64>,
  resources: Resources,
  ntp_queries: Mutex<Vec<String>>,
}
impl FixedProbes {
  /// Everything up, clocks in sync.
  pub fn healthy() -> FixedProbes {
    FixedProbes {
      processes_ok: true,
      internet_ok: true,
      ntp_offset: Some(0),
      resources: Resources::default(),
      ntp_queries: Mutex::new(vec![]),
    }
  }

  pub fn with_processes(mut self, ok: bool) -> FixedProbes {
    self.processes_ok = ok;
    self
  }

  pub fn with_internet(mut self, ok: bool) -> FixedProbes {
    self.internet_ok = ok;
    self
  }

  /// The offset every server answers with. `None` makes every query fail.
  pub fn with_ntp_offset(mut self, offset: Option<i64>) -> FixedProbes {
    self.ntp_offset = offset;
    self
  }

  pub fn with_resources(mut self, resources: Resources) -> FixedProbes {
    self.resources = resources;
    self
  }

  /// The servers queried so far, in order.
  pub fn ntp_queries(&self) -> Vec<String> {
    self.ntp_queries.lock().unwrap_or_else(PoisonError::into_inner).clone()
  }
}
#[async_trait]
impl HealthProbes for FixedProbes {
  async fn processes_ok(&self) -> bool {
    self.processes_ok
  }

  async fn internet_ok(&self) -> bool {
    self.internet_ok
  }

  async fn ntp_offset(&self, server: &str) -> Result<i64, ProbeError> {
    self
      .ntp_queries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(server.to_string());
    self.ntp_offset.ok_or_else(|| ProbeError::Timeout(server.to_string()))
  }

  async fn resources(&self) -> Resources {
    self.resources
  }
}
