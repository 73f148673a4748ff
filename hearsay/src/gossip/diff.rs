use crate::peer::{HeartbeatState, PeerRecord, PublicKey};
use std::collections::HashMap;

/// Every record of `comparee` that `reference` lacks, or holds an older copy of.
///
/// Records with the same heartbeat on both sides are left out, so unchanged state is never sent
/// twice.
pub fn unknown_or_stale<R, C>(reference: &[R], comparee: &[C]) -> Vec<C>
where
  R: PeerRecord,
  C: PeerRecord + Clone,
{
  let index = reference
    .iter()
    .map(|p| (p.key(), p.heartbeat()))
    .collect::<HashMap<&PublicKey, &HeartbeatState>>();
  comparee
    .iter()
    .filter(|p| match index.get(p.key()) {
      None => true,
      Some(known) => p.heartbeat().more_recent_than(known),
    })
    .cloned()
    .collect()
}

/// Both directions of a reconciliation between a local view and another one.
#[derive(Debug)]
pub struct Diff<L, C> {
  /// Records of the other view that the local view lacks or holds stale.
  pub unknown_to_me: Vec<C>,
  /// Records of the local view that the other view lacks or holds stale.
  pub unknown_to_them: Vec<L>,
}
impl<L, C> Diff<L, C>
where
  L: PeerRecord + Clone,
  C: PeerRecord + Clone,
{
  pub fn between(local: &[L], comparee: &[C]) -> Diff<L, C> {
    Diff {
      unknown_to_me: unknown_or_stale(local, comparee),
      unknown_to_them: unknown_or_stale(comparee, local),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.unknown_to_me.is_empty() && self.unknown_to_them.is_empty()
  }
}

#[cfg(test)]
use crate::peer::{Host, PeerDigest, PeerIdentity};
#[cfg(test)]
use itertools::Itertools;

#[cfg(test)]
fn digest(key: &str, generation: u64, elapsed: u64) -> PeerDigest {
  PeerDigest::new(
    PeerIdentity::new(key, Host::from("127.0.0.1"), 3000),
    HeartbeatState::new(generation, elapsed),
  )
}

#[cfg(test)]
fn keys(peers: &[PeerDigest]) -> Vec<&str> {
  peers.iter().map(|p| p.key().as_str()).sorted().collect()
}

#[test]
fn test_disjoint_sets() {
  let local = vec![digest("a", 1, 10), digest("b", 1, 10)];
  let remote = vec![digest("c", 1, 10), digest("d", 2, 0), digest("e", 3, 7)];
  assert_eq!(unknown_or_stale(&local, &remote), remote);
  assert_eq!(unknown_or_stale(&remote, &local), local);
}

#[test]
fn test_equal_state_is_never_exchanged() {
  let local = vec![digest("a", 5, 1000), digest("b", 5, 1000)];
  let remote = vec![digest("a", 5, 1000), digest("c", 5, 1000)];
  let diff = Diff::between(&local, &remote);
  assert_eq!(keys(&diff.unknown_to_me), vec!["c"]);
  assert_eq!(keys(&diff.unknown_to_them), vec!["b"]);
}

#[test]
fn test_fresher_copy_flows_one_way() {
  let x = vec![digest("p", 100, 1000)];
  let y = vec![digest("p", 100, 1200)];
  assert_eq!(unknown_or_stale(&x, &y), y);
  assert!(unknown_or_stale(&y, &x).is_empty());
}

#[test]
fn test_mixed_views() {
  let local = vec![
    digest("same", 1, 50),
    digest("mine-newer", 1, 90),
    digest("theirs-newer", 1, 10),
    digest("restarted-here", 9, 1),
    digest("only-mine", 1, 1),
  ];
  let remote = vec![
    digest("same", 1, 50),
    digest("mine-newer", 1, 80),
    digest("theirs-newer", 1, 20),
    digest("restarted-here", 4, 10_000),
    digest("only-theirs", 1, 1),
  ];
  let diff = Diff::between(&local, &remote);
  assert_eq!(keys(&diff.unknown_to_me), vec!["only-theirs", "theirs-newer"]);
  assert_eq!(
    keys(&diff.unknown_to_them),
    vec!["mine-newer", "only-mine", "restarted-here"]
  );
  assert!(!diff.is_empty());
  assert!(Diff::between(&local, &local).is_empty());
}
