use crate::config::NodeConfig;
use crate::status::sntp;
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

#[derive(thiserror::Error, Debug)]
pub enum ProbeError {
  #[error("no answer from {0}")]
  Timeout(String),
  #[error("malformed reply: {0}")]
  Malformed(String),
  #[error(transparent)]
  Io(#[from] std::io::Error),
}

/// Resource usage reported in the application state.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Resources {
  /// Load average per CPU.
  pub cpu_load: f64,
  /// In bytes.
  pub free_disk_space: u64,
}

/// The checks the status of a node is derived from.
#[async_trait]
pub trait HealthProbes: Send + Sync {
  /// Whether every local service the node depends on is up.
  async fn processes_ok(&self) -> bool;

  async fn internet_ok(&self) -> bool;

  /// Offset of the local clock against `server`, in milliseconds.
  async fn ntp_offset(&self, server: &str) -> Result<i64, ProbeError>;

  async fn resources(&self) -> Resources;
}

/// Probes the machine the node runs on.
pub struct SystemProbes {
  required_services: Vec<String>,
  internet_check: String,
  connect_timeout: Duration,
  ntp_timeout: Duration,
}
impl SystemProbes {
  pub fn new(cfg: &NodeConfig) -> SystemProbes {
    SystemProbes {
      required_services: cfg.required_services.clone(),
      internet_check: cfg.internet_check.clone(),
      connect_timeout: cfg.connect_timeout,
      ntp_timeout: cfg.ntp.timeout,
    }
  }

  async fn accepts(&self, addr: &str) -> bool {
    match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
      Ok(Ok(_)) => true,
      Ok(Err(e)) => {
        debug!(%addr, error = %e, "connection refused");
        false
      }
      Err(_) => {
        debug!(%addr, "connection timed out");
        false
      }
    }
  }
}
#[async_trait]
impl HealthProbes for SystemProbes {
  async fn processes_ok(&self) -> bool {
    for service in self.required_services.iter() {
      if !self.accepts(service).await {
        return false;
      }
    }
    true
  }

  async fn internet_ok(&self) -> bool {
    self.accepts(&self.internet_check).await
  }

  async fn ntp_offset(&self, server: &str) -> Result<i64, ProbeError> {
    sntp::query(server, self.ntp_timeout).await
  }

  async fn resources(&self) -> Resources {
    let snapshot = tokio::task::spawn_blocking(|| Resources {
      cpu_load: cpu_load().unwrap_or(0.0),
      free_disk_space: free_disk_space().unwrap_or(0),
    });
    snapshot.await.unwrap_or_default()
  }
}

fn cpu_load() -> Option<f64> {
  let loadavg = std::fs::read_to_string("/proc/loadavg").ok()?;
  let load = parse_loadavg(&loadavg)?;
  Some(load / num_cpus::get() as f64)
}

fn parse_loadavg(s: &str) -> Option<f64> {
  s.split_whitespace().next()?.parse().ok()
}

// Asks `df` rather than statvfs(2) to keep the crate free of unsafe code.
fn free_disk_space() -> Option<u64> {
  let out = std::process::Command::new("df").args(&["-Pk", "."]).output().ok()?;
  if !out.status.success() {
    trace!(status = ?out.status, "df failed");
    return None;
  }
  parse_df(&String::from_utf8_lossy(&out.stdout))
}

// POSIX output: a header line, then `fs blocks used available capacity mount` in KiB.
fn parse_df(s: &str) -> Option<u64> {
  let available = s.lines().nth(1)?.split_whitespace().nth(3)?;
  available.parse::<u64>().ok().map(|kib| kib * 1024)
}

#[test]
fn test_parse_loadavg() {
  assert_eq!(parse_loadavg("0.52 0.58 0.59 1/467 12345\n"), Some(0.52));
  assert_eq!(parse_loadavg(""), None);
}

#[test]
fn test_parse_df() {
  let out = "Filesystem     1024-blocks      Used Available Capacity Mounted on\n\
             /dev/nvme0n1p2   488245288 212740052 250630656      46% /\n";
  assert_eq!(parse_df(out), Some(250_630_656 * 1024));
  assert_eq!(parse_df("Filesystem\n"), None);
}

#[tokio::test]
async fn test_required_services() {
  let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
  let up = listener.local_addr().unwrap().to_string();
  let closed = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
  let down = closed.local_addr().unwrap().to_string();
  drop(closed);

  let mut cfg = NodeConfig::default();
  cfg.required_services = vec![up.clone()];
  cfg.internet_check = up.clone();
  let probes = SystemProbes::new(&cfg);
  assert!(probes.processes_ok().await);
  assert!(probes.internet_ok().await);

  cfg.required_services = vec![up, down];
  assert!(!SystemProbes::new(&cfg).processes_ok().await);
}
