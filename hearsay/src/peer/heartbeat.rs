use serde::{Deserialize, Serialize};
use std::cmp::{max, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Liveness clock of a peer process.
///
/// `generation_time` is fixed when the process starts. `elapsed_heartbeats` counts the milliseconds
/// observed for that generation. Together they order two copies of the same peer: see
/// [`more_recent_than`](HeartbeatState::more_recent_than).
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct HeartbeatState {
  /// Process start, in milliseconds since the Unix epoch. Zero when unknown (seeds).
  pub generation_time: u64,
  pub elapsed_heartbeats: u64,
}
impl HeartbeatState {
  pub fn new(generation_time: u64, elapsed_heartbeats: u64) -> HeartbeatState {
    HeartbeatState {
      generation_time: generation_time,
      elapsed_heartbeats: elapsed_heartbeats,
    }
  }

  /// A fresh generation with nothing elapsed yet.
  pub fn started_at(generation_time: u64) -> HeartbeatState {
    HeartbeatState::new(generation_time, 0)
  }

  /// Newer generations always win. Within a generation, more elapsed heartbeats win. Exact ties are
  /// not more recent in either direction.
  pub fn more_recent_than(&self, other: &HeartbeatState) -> bool {
    match self.generation_time.cmp(&other.generation_time) {
      Ordering::Greater => true,
      Ordering::Less => false,
      Ordering::Equal => self.elapsed_heartbeats > other.elapsed_heartbeats,
    }
  }

  /// Computes the elapsed count from the wall clock, once. Does nothing if the count is already
  /// set or the generation is unknown.
  pub fn freeze(&mut self, now: u64) {
    if self.elapsed_heartbeats == 0 && self.generation_time != 0 {
      self.elapsed_heartbeats = now.saturating_sub(self.generation_time);
    }
  }

  /// Advances the elapsed count of the local peer. Never moves it backwards.
  pub fn beat(&mut self, now: u64) {
    self.elapsed_heartbeats = max(
      self.elapsed_heartbeats,
      now.saturating_sub(self.generation_time),
    );
  }

  pub fn elapsed(&self) -> Duration {
    Duration::from_millis(self.elapsed_heartbeats)
  }
}

/// Milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as u64)
    .unwrap_or(0)
}

#[test]
fn test_equal_heartbeats_are_not_more_recent() {
  let a = HeartbeatState::new(1_000, 1000);
  let b = HeartbeatState::new(1_000, 1000);
  assert!(!a.more_recent_than(&b));
  assert!(!b.more_recent_than(&a));
}

#[test]
fn test_comparator_within_generation() {
  let elapsed = [0u64, 1, 999, 1000, 1200, u64::MAX];
  for x in elapsed.iter() {
    for y in elapsed.iter() {
      let a = HeartbeatState::new(42, *x);
      let b = HeartbeatState::new(42, *y);
      assert_eq!(a.more_recent_than(&b), x > y);
      assert!(!(a.more_recent_than(&b) && b.more_recent_than(&a)));
    }
  }
}

#[test]
fn test_generation_dominates_elapsed() {
  let restarted = HeartbeatState::new(2_000, 5);
  let old = HeartbeatState::new(1_000, 1_000_000);
  assert!(restarted.more_recent_than(&old));
  assert!(!old.more_recent_than(&restarted));
}

#[test]
fn test_freeze_only_once() {
  let mut hb = HeartbeatState::started_at(1_000);
  hb.freeze(1_500);
  assert_eq!(hb.elapsed_heartbeats, 500);
  hb.freeze(9_000);
  assert_eq!(hb.elapsed_heartbeats, 500);

  let mut unknown = HeartbeatState::default();
  unknown.freeze(9_000);
  assert_eq!(unknown.elapsed_heartbeats, 0);
}

#[test]
fn test_beat_is_monotonic() {
  let mut hb = HeartbeatState::started_at(1_000);
  hb.beat(3_000);
  assert_eq!(hb.elapsed(), Duration::from_millis(2_000));
  // A wall clock step backwards does not rewind the counter.
  hb.beat(2_000);
  assert_eq!(hb.elapsed_heartbeats, 2_000);
}
