use crate::config::{NodeConfig, NtpConfig};
use crate::peer::{DiscoveredPeer, Peer, PeerRecord, PeerStatus, PublicKey, Seed};
use crate::status::HealthProbes;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Outcome of the probes for one evaluation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProbeResults {
  pub processes_ok: bool,
  pub internet_ok: bool,
  pub ntp_ok: bool,
}

/// The status decision table. The first matching row wins.
pub fn decide(
  probes: ProbeResults,
  seed_average: f64,
  elapsed: Duration,
  bootstrap_min: Duration,
  discovered: u32,
) -> PeerStatus {
  if !probes.processes_ok || !probes.internet_ok {
    PeerStatus::Faulty
  } else if !probes.ntp_ok {
    PeerStatus::StorageOnly
  } else if seed_average == 0.0 {
    PeerStatus::Bootstrapping
  } else if elapsed < bootstrap_min && (discovered as f64) < seed_average {
    PeerStatus::Bootstrapping
  } else {
    PeerStatus::Ok
  }
}

/// Mean number of peers the seeds report having discovered. Only seeds with a full record in
/// `known` count; zero if there are none.
pub fn seed_average(seeds: &[Seed], known: &[Peer]) -> f64 {
  let keys = seeds.iter().map(|s| s.identity.key()).collect::<HashSet<&PublicKey>>();
  let counts = known
    .iter()
    .filter(|p| keys.contains(p.key()))
    .filter_map(Peer::as_discovered)
    .map(|p| p.app_state.discovered_peers_number as f64)
    .collect::<Vec<_>>();
  if counts.is_empty() {
    0.0
  } else {
    counts.iter().sum::<f64>() / counts.len() as f64
  }
}

/// Derives the status of the local peer once per tick.
pub struct StatusEvaluator {
  probes: Arc<dyn HealthProbes>,
  ntp: NtpConfig,
  bootstrap_min: Duration,
  p2p_factor: u32,
}
impl StatusEvaluator {
  pub fn new(
    probes: Arc<dyn HealthProbes>,
    ntp: NtpConfig,
    bootstrap_min: Duration,
    p2p_factor: u32,
  ) -> StatusEvaluator {
    StatusEvaluator {
      probes: probes,
      ntp: ntp,
      bootstrap_min: bootstrap_min,
      p2p_factor: p2p_factor,
    }
  }

  pub fn from_config(probes: Arc<dyn HealthProbes>, cfg: &NodeConfig) -> StatusEvaluator {
    StatusEvaluator::new(probes, cfg.ntp.clone(), cfg.bootstrap_min, cfg.p2p_factor)
  }

  /// Asks the configured servers in turn, wrapping around, for at most `retries` answers. The
  /// first answer decides. An empty server list passes.
  pub async fn ntp_ok(&self) -> bool {
    if self.ntp.servers.is_empty() {
      return true;
    }
    let max_offset = self.ntp.max_offset.as_millis() as u64;
    for server in self.ntp.servers.iter().cycle().take(self.ntp.retries) {
      match self.probes.ntp_offset(server).await {
        Ok(offset) => {
          trace!(%server, offset, "clock offset");
          return offset.unsigned_abs() <= max_offset;
        }
        Err(e) => debug!(%server, error = %e, "NTP query failed"),
      }
    }
    false
  }

  /// Runs the probes lazily, in decision table order.
  pub async fn evaluate(
    &self,
    owned: &DiscoveredPeer,
    seeds: &[Seed],
    known: &[Peer],
  ) -> PeerStatus {
    let processes_ok = self.probes.processes_ok().await;
    let internet_ok = processes_ok && self.probes.internet_ok().await;
    let ntp_ok = internet_ok && self.ntp_ok().await;
    let probes = ProbeResults {
      processes_ok: processes_ok,
      internet_ok: internet_ok,
      ntp_ok: ntp_ok,
    };
    decide(
      probes,
      seed_average(seeds, known),
      owned.heartbeat.elapsed(),
      self.bootstrap_min,
      discovered_count(known),
    )
  }

  /// Rewrites the application state of the owned peer: status, resources and discovery count.
  pub async fn refresh(&self, owned: &mut DiscoveredPeer, seeds: &[Seed], known: &[Peer]) {
    let status = self.evaluate(owned, seeds, known).await;
    let resources = self.probes.resources().await;
    if status != owned.status() {
      debug!(from = ?owned.status(), to = ?status, "status changed");
    }
    owned.refresh(
      status,
      resources.free_disk_space,
      resources.cpu_load,
      discovered_count(known),
      self.p2p_factor,
    );
  }
}

fn discovered_count(known: &[Peer]) -> u32 {
  known.iter().filter(|p| !p.is_owned()).count() as u32
}

#[cfg(test)]
use crate::peer::{AppState, HeartbeatState, Host, PeerIdentity};
#[cfg(test)]
use crate::status::Resources;
#[cfg(test)]
use crate::testkit::FixedProbes;

#[cfg(test)]
const ALL_OK: ProbeResults = ProbeResults {
  processes_ok: true,
  internet_ok: true,
  ntp_ok: true,
};

#[cfg(test)]
fn identity(key: &str, port: u16) -> PeerIdentity {
  PeerIdentity::new(key, Host::from("127.0.0.1"), port)
}

#[cfg(test)]
fn seed_record(key: &str, port: u16, discovered: u32) -> Peer {
  let mut app = AppState::default();
  app.discovered_peers_number = discovered;
  Peer::Discovered(DiscoveredPeer::new(identity(key, port), HeartbeatState::new(1, 1), app))
}

#[test]
fn test_decision_table() {
  let min = Duration::from_secs(60);
  let young = Duration::from_secs(10);
  let old = Duration::from_secs(600);
  let no_internet = ProbeResults {
    internet_ok: false,
    ..ALL_OK
  };
  let no_processes = ProbeResults {
    processes_ok: false,
    ntp_ok: false,
    ..ALL_OK
  };
  let no_ntp = ProbeResults {
    ntp_ok: false,
    ..ALL_OK
  };
  assert_eq!(decide(no_processes, 5.0, old, min, 10), PeerStatus::Faulty);
  assert_eq!(decide(no_internet, 5.0, old, min, 10), PeerStatus::Faulty);
  assert_eq!(decide(no_ntp, 0.0, young, min, 0), PeerStatus::StorageOnly);
  assert_eq!(decide(ALL_OK, 0.0, old, min, 10), PeerStatus::Bootstrapping);
  assert_eq!(decide(ALL_OK, 5.0, young, min, 4), PeerStatus::Bootstrapping);
  // Either condition alone is not enough to keep bootstrapping.
  assert_eq!(decide(ALL_OK, 5.0, young, min, 5), PeerStatus::Ok);
  assert_eq!(decide(ALL_OK, 5.0, old, min, 4), PeerStatus::Ok);
}

#[test]
fn test_seed_average() {
  let seeds = vec![Seed::new(identity("s1", 4001)), Seed::new(identity("s2", 4002))];
  assert_eq!(seed_average(&seeds, &[]), 0.0);
  let known = vec![
    seed_record("s1", 4001, 4),
    seed_record("s2", 4002, 8),
    seed_record("other", 5000, 100),
  ];
  assert_eq!(seed_average(&seeds, &known), 6.0);
  // A seed only known by digest does not count.
  let known = vec![
    seed_record("s1", 4001, 4),
    Peer::Digest(Seed::new(identity("s2", 4002)).to_digest()),
  ];
  assert_eq!(seed_average(&seeds, &known), 4.0);
}

#[tokio::test]
async fn test_ntp_retries_across_servers() {
  let probes = Arc::new(FixedProbes::healthy().with_ntp_offset(None));
  let ntp = NtpConfig {
    servers: vec!["a".to_string(), "b".to_string()],
    retries: 3,
    ..Default::default()
  };
  let evaluator = StatusEvaluator::new(probes.clone(), ntp, Duration::from_secs(60), 3);
  assert!(!evaluator.ntp_ok().await);
  assert_eq!(probes.ntp_queries(), vec!["a", "b", "a"]);

  let drifting = Arc::new(FixedProbes::healthy().with_ntp_offset(Some(-1_500)));
  let evaluator = StatusEvaluator::new(drifting.clone(), NtpConfig::default(), Duration::ZERO, 3);
  assert!(!evaluator.ntp_ok().await);
  assert_eq!(drifting.ntp_queries().len(), 1);

  let unconfigured = NtpConfig {
    servers: vec![],
    ..Default::default()
  };
  let evaluator = StatusEvaluator::new(drifting, unconfigured, Duration::ZERO, 3);
  assert!(evaluator.ntp_ok().await);
}

#[tokio::test]
async fn test_refresh_owned_peer() {
  let resources = Resources {
    cpu_load: 0.5,
    free_disk_space: 1 << 20,
  };
  let probes = Arc::new(FixedProbes::healthy().with_resources(resources));
  let evaluator = StatusEvaluator::new(probes, NtpConfig::default(), Duration::from_secs(60), 2);
  let mut me = DiscoveredPeer::owned(identity("me", 3000), 1_000, AppState::default());
  me.heartbeat.beat(2_000);
  let seeds = vec![Seed::new(identity("s1", 4001))];
  let known = vec![Peer::Discovered(me.clone()), seed_record("s1", 4001, 3)];

  evaluator.refresh(&mut me, &seeds, &known).await;
  assert_eq!(me.status(), PeerStatus::Bootstrapping);
  assert_eq!(me.app_state.discovered_peers_number, 1);
  assert_eq!(me.app_state.cpu_load, 0.5);
  assert_eq!(me.app_state.free_disk_space, 1 << 20);
  assert_eq!(me.app_state.p2p_factor, 2);
  assert_eq!(me.heartbeat, HeartbeatState::new(1_000, 1_000));

  let faulty = StatusEvaluator::new(
    Arc::new(FixedProbes::healthy().with_internet(false)),
    NtpConfig::default(),
    Duration::from_secs(60),
    2,
  );
  faulty.refresh(&mut me, &seeds, &known).await;
  assert_eq!(me.status(), PeerStatus::Faulty);
}

#[tokio::test]
async fn test_dead_processes_skip_other_probes() {
  let probes = Arc::new(FixedProbes::healthy().with_processes(false));
  let evaluator = StatusEvaluator::new(probes.clone(), NtpConfig::default(), Duration::ZERO, 3);
  let mut me = DiscoveredPeer::owned(identity("me", 3000), 1_000, AppState::default());
  let known = [Peer::Discovered(me.clone())];
  evaluator.refresh(&mut me, &[], &known).await;
  assert_eq!(me.status(), PeerStatus::Faulty);
  assert!(probes.ntp_queries().is_empty());
}
