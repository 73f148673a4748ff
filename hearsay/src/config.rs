//! Configuration of a node. Simple values, no logic beyond loading.

use crate::peer::{GeoPosition, Host, PeerIdentity, Seed};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
  #[error(transparent)]
  Load(#[from] ::config::ConfigError),
  #[error("public_key is not set")]
  MissingPublicKey,
}

/// Where and how a node gossips. Every field has a default, so a config file only needs to name
/// what differs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
  /// The key identifying this node in the cluster. Loading fails if it is left empty.
  ///
  /// default: `""`
  pub public_key: String,
  /// The address other nodes reach this one on.
  ///
  /// default: `127.0.0.1`
  pub host: String,
  /// The TCP port gossip is received on.
  ///
  /// default: `3000`
  pub port: u16,
  /// How often a gossip cycle runs.
  ///
  /// default: `1 second`
  #[serde(with = "millis")]
  pub tick_interval: Duration,
  /// Bootstrap contacts. A node refuses to start without at least one.
  ///
  /// default: `[]`
  pub seeds: Vec<SeedConfig>,
  /// Replication factor announced to other peers.
  ///
  /// default: `3`
  pub p2p_factor: u32,
  /// A node younger than this stays `Bootstrapping` while it knows fewer peers than the seeds do.
  ///
  /// default: `60 seconds`
  #[serde(with = "millis")]
  pub bootstrap_min: Duration,
  /// How long to wait for a TCP connection to another node.
  ///
  /// default: `500 milliseconds`
  #[serde(with = "millis")]
  pub connect_timeout: Duration,
  /// How long a whole gossip message exchange may take once connected.
  ///
  /// default: `2 seconds`
  #[serde(with = "millis")]
  pub io_timeout: Duration,
  /// An address that must accept TCP connections for the node to consider itself online.
  ///
  /// default: `1.1.1.1:53`
  pub internet_check: String,
  /// Local services (`host:port`) that must accept connections for the node to be healthy.
  ///
  /// default: `[]`
  pub required_services: Vec<String>,
  pub ntp: NtpConfig,
  /// Reported as is in the application state.
  ///
  /// default: `0, 0`
  pub geo_position: GeoPosition,
}
impl Default for NodeConfig {
  fn default() -> Self {
    NodeConfig {
      public_key: String::new(),
      host: "127.0.0.1".to_string(),
      port: 3000,
      tick_interval: Duration::from_secs(1),
      seeds: vec![],
      p2p_factor: 3,
      bootstrap_min: Duration::from_secs(60),
      connect_timeout: Duration::from_millis(500),
      io_timeout: Duration::from_secs(2),
      internet_check: "1.1.1.1:53".to_string(),
      required_services: vec![],
      ntp: NtpConfig::default(),
      geo_position: GeoPosition::default(),
    }
  }
}
impl NodeConfig {
  /// Defaults, overridden by the file at `path` if any, overridden by `HEARSAY_*` environment
  /// variables (`HEARSAY_PORT`, `HEARSAY_NTP__RETRIES`, ...).
  pub fn load(path: Option<&Path>) -> Result<NodeConfig, ConfigError> {
    let mut builder =
      ::config::Config::builder().add_source(::config::Config::try_from(&NodeConfig::default())?);
    if let Some(path) = path {
      builder = builder.add_source(::config::File::from(path));
    }
    let env = ::config::Environment::with_prefix("HEARSAY")
      .prefix_separator("_")
      .separator("__")
      .try_parsing(true);
    let settings = builder.add_source(env).build()?;
    let cfg: NodeConfig = settings.try_deserialize()?;
    // Nodes sharing the empty key would overwrite each other in every peer table.
    if cfg.public_key.trim().is_empty() {
      return Err(ConfigError::MissingPublicKey);
    }
    Ok(cfg)
  }

  pub fn identity(&self) -> PeerIdentity {
    PeerIdentity::new(self.public_key.as_str(), Host::from(self.host.clone()), self.port)
  }

  pub fn seeds(&self) -> Vec<Seed> {
    self.seeds.iter().map(SeedConfig::to_seed).collect()
  }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SeedConfig {
  pub public_key: String,
  pub host: String,
  pub port: u16,
}
impl SeedConfig {
  pub fn to_seed(&self) -> Seed {
    Seed::new(PeerIdentity::new(
      self.public_key.as_str(),
      Host::from(self.host.clone()),
      self.port,
    ))
  }
}

/// Clock synchronization check.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NtpConfig {
  /// Queried in order, wrapping around, until one answers. Empty disables the check.
  ///
  /// default: `pool.ntp.org`, `time.google.com`
  pub servers: Vec<String>,
  /// Total number of queries before giving up.
  ///
  /// default: `3`
  pub retries: usize,
  /// The largest acceptable clock offset, in either direction.
  ///
  /// default: `1 second`
  #[serde(with = "millis")]
  pub max_offset: Duration,
  /// How long to wait for a single server.
  ///
  /// default: `1 second`
  #[serde(with = "millis")]
  pub timeout: Duration,
}
impl Default for NtpConfig {
  fn default() -> Self {
    NtpConfig {
      servers: vec!["pool.ntp.org".to_string(), "time.google.com".to_string()],
      retries: 3,
      max_offset: Duration::from_secs(1),
      timeout: Duration::from_secs(1),
    }
  }
}

// Durations are written as milliseconds in config files.
mod millis {
  use serde::{Deserialize, Deserializer, Serializer};
  use std::time::Duration;

  pub fn serialize<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(dur.as_millis() as u64)
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    u64::deserialize(d).map(Duration::from_millis)
  }
}

#[test]
fn test_default_config() {
  let cfg = NodeConfig::default();
  assert_eq!(cfg.tick_interval, Duration::from_secs(1));
  assert_eq!(cfg.identity().endpoint(), "127.0.0.1:3000");
  assert!(cfg.seeds().is_empty());
  assert_eq!(cfg.ntp.retries, 3);
}

#[test]
fn test_load_from_file() {
  let path = std::env::temp_dir().join(format!("hearsay-config-{}.toml", std::process::id()));
  std::fs::write(
    &path,
    r#"
public_key = "node-1"
port = 3101
tick_interval = 250

[[seeds]]
public_key = "seed-1"
host = "10.0.0.1"
port = 3000

[ntp]
retries = 5
"#,
  )
  .unwrap();
  let cfg = NodeConfig::load(Some(path.as_path())).unwrap();
  std::fs::remove_file(&path).unwrap();
  assert_eq!(cfg.public_key, "node-1");
  assert_eq!(cfg.port, 3101);
  assert_eq!(cfg.tick_interval, Duration::from_millis(250));
  assert_eq!(cfg.seeds()[0].identity.endpoint(), "10.0.0.1:3000");
  assert_eq!(cfg.ntp.retries, 5);
  assert_eq!(cfg.ntp.max_offset, Duration::from_secs(1));
  assert_eq!(cfg.bootstrap_min, Duration::from_secs(60));
}

#[test]
fn test_load_rejects_missing_key() {
  let path = std::env::temp_dir().join(format!("hearsay-nokey-{}.toml", std::process::id()));
  std::fs::write(&path, "port = 3102\n").unwrap();
  let res = NodeConfig::load(Some(path.as_path()));
  std::fs::remove_file(&path).unwrap();
  assert!(matches!(res, Err(ConfigError::MissingPublicKey)));
}
