use crate::error::GossipError;
use crate::gossip::{round_channels, CycleReport, Round};
use crate::peer::{Peer, PeerDigest, PeerIdentity, PeerRecord, Seed};
use crate::store::Repository;
use crate::transport::Transport;
use rand::seq::IteratorRandom;
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, trace};

/// Picks the targets of a cycle: one seed, one reachable peer and one unreachable peer, each
/// sampled independently and never the local node itself.
///
/// The same node may come out twice if it is both a seed and a known peer. Fails with
/// [`GossipError::EmptySeed`] when there are no seeds at all.
pub fn select_peers<R: Rng + ?Sized>(
  owned: &PeerIdentity,
  seeds: &[Seed],
  reachable: &[Peer],
  unreachable: &[Peer],
  rng: &mut R,
) -> Result<Vec<PeerIdentity>, GossipError> {
  if seeds.is_empty() {
    return Err(GossipError::EmptySeed);
  }
  let mut targets = Vec::with_capacity(3);
  targets.extend(pick(seeds.iter().map(|s| &s.identity), owned, rng));
  targets.extend(pick(reachable.iter().map(PeerRecord::identity), owned, rng));
  targets.extend(pick(unreachable.iter().map(PeerRecord::identity), owned, rng));
  Ok(targets)
}

fn pick<'a, I, R>(candidates: I, owned: &PeerIdentity, rng: &mut R) -> Option<PeerIdentity>
where
  I: Iterator<Item = &'a PeerIdentity>,
  R: Rng + ?Sized,
{
  candidates
    .filter(|id| !id.is_same_node(owned))
    .choose(rng)
    .cloned()
}

/// Runs the rounds of one tick.
pub struct Cycle {
  repository: Arc<dyn Repository>,
  transport: Arc<dyn Transport>,
}
impl Cycle {
  pub fn new(repository: Arc<dyn Repository>, transport: Arc<dyn Transport>) -> Cycle {
    Cycle {
      repository: repository,
      transport: transport,
    }
  }

  /// Selects targets, runs one round per target concurrently and waits for all of them.
  ///
  /// Only the seed precondition and repository reads fail the cycle. Round failures end up in
  /// [`CycleReport::errors`] and never stop the other rounds.
  pub async fn run<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<CycleReport, GossipError> {
    let owned = self.repository.get_owned_peer().await?;
    let seeds = self.repository.list_seed_peers().await?;
    let reachable = self.repository.list_reachable_peers().await?;
    let unreachable = self.repository.list_unreachable_peers().await?;
    let targets = select_peers(&owned.identity, &seeds, &reachable, &unreachable, rng)?;
    debug!(
      targets = ?targets.iter().map(|t| t.endpoint()).collect::<Vec<_>>(),
      "starting gossip cycle"
    );

    let digests = self
      .repository
      .list_known_peers()
      .await?
      .iter()
      .map(Peer::to_digest)
      .collect::<Arc<[PeerDigest]>>();
    let (outputs, inbox) = round_channels();
    let handles = targets
      .iter()
      .cloned()
      .map(|target| {
        let round = Round::new(
          self.transport.clone(),
          self.repository.clone(),
          owned.identity.clone(),
          digests.clone(),
          target,
        );
        let outputs = outputs.clone();
        tokio::spawn(async move {
          let target = round.target().clone();
          if let Err(e) = round.run(&outputs).await {
            trace!(to = %target, error = %e, "round failed");
            outputs.error(e);
          }
        })
      })
      .collect::<Vec<_>>();
    for handle in handles {
      if let Err(e) = handle.await {
        outputs.error(GossipError::RoundPanicked(e.to_string()));
      }
    }
    drop(outputs);
    Ok(inbox.drain(targets))
  }
}

#[cfg(test)]
use crate::peer::{AppState, DiscoveredPeer, HeartbeatState, Host};
#[cfg(test)]
use maplit::hashset;
#[cfg(test)]
use rand::rngs::SmallRng;
#[cfg(test)]
use rand::SeedableRng;

#[cfg(test)]
fn identity(key: &str, port: u16) -> PeerIdentity {
  PeerIdentity::new(key, Host::from("127.0.0.1"), port)
}

#[cfg(test)]
fn peer(key: &str, port: u16) -> Peer {
  Peer::Discovered(DiscoveredPeer::new(
    identity(key, port),
    HeartbeatState::new(1, 1),
    AppState::default(),
  ))
}

#[test]
fn test_no_seeds_is_an_error() {
  let mut rng = SmallRng::seed_from_u64(7);
  let me = identity("me", 3000);
  assert!(matches!(
    select_peers(&me, &[], &[peer("a", 3001)], &[], &mut rng),
    Err(GossipError::EmptySeed)
  ));
}

#[test]
fn test_one_target_per_category() {
  let mut rng = SmallRng::seed_from_u64(7);
  let me = identity("me", 3000);
  let seeds = vec![Seed::new(identity("seed", 4000))];
  let reachable = vec![peer("a", 3001)];
  let unreachable = vec![peer("b", 3002)];
  let targets = select_peers(&me, &seeds, &reachable, &unreachable, &mut rng).unwrap();
  assert_eq!(
    targets,
    vec![identity("seed", 4000), identity("a", 3001), identity("b", 3002)]
  );
  let only_seed = select_peers(&me, &seeds, &[], &[], &mut rng).unwrap();
  assert_eq!(only_seed, vec![identity("seed", 4000)]);
}

#[test]
fn test_never_selects_itself() {
  let me = identity("me", 3000);
  // A seed entry pointing at our own endpoint under another key, and our own key elsewhere.
  let seeds = vec![
    Seed::new(identity("seed-alias", 3000)),
    Seed::new(identity("seed", 4000)),
  ];
  let reachable = vec![peer("me", 3999), peer("a", 3001), peer("b", 3002)];
  let unreachable = vec![peer("c", 3000)];
  for seed in 0..200 {
    let mut rng = SmallRng::seed_from_u64(seed);
    let targets = select_peers(&me, &seeds, &reachable, &unreachable, &mut rng).unwrap();
    assert_eq!(targets.len(), 2);
    for t in targets.iter() {
      assert!(t.endpoint() != me.endpoint() && *t != me, "selected {}", t);
    }
  }
}

#[test]
fn test_samples_every_candidate() {
  let me = identity("me", 3000);
  let seeds = vec![Seed::new(identity("seed", 4000))];
  let reachable = (1..=5u16).map(|i| peer(&format!("p{}", i), 3000 + i)).collect::<Vec<_>>();
  let mut seen = std::collections::HashSet::new();
  let mut rng = SmallRng::seed_from_u64(99);
  for _ in 0..500 {
    let targets = select_peers(&me, &seeds, &reachable, &[], &mut rng).unwrap();
    seen.insert(targets[1].key().to_string());
  }
  assert_eq!(
    seen,
    hashset! {
      "p1".to_string(),
      "p2".to_string(),
      "p3".to_string(),
      "p4".to_string(),
      "p5".to_string(),
    }
  );
}
