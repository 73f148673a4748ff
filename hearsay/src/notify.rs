//! Tells the rest of the process about peers merged into the local table.

use crate::peer::{Peer, PeerRecord};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{info, trace};

/// Called once per newly merged peer. Fire and forget: a notifier must not block the gossip core.
pub trait Notifier: Send + Sync {
  fn notify(&self, peer: Peer);
}

/// Forwards merged peers to a channel.
pub struct ChannelNotifier {
  tx: UnboundedSender<Peer>,
}
impl ChannelNotifier {
  pub fn new() -> (ChannelNotifier, UnboundedReceiver<Peer>) {
    let (tx, rx) = unbounded_channel();
    (ChannelNotifier { tx: tx }, rx)
  }
}
impl Notifier for ChannelNotifier {
  fn notify(&self, peer: Peer) {
    if let Err(e) = self.tx.send(peer) {
      trace!(peer = %e.0.identity(), "notification dropped, nobody is listening");
    }
  }
}

/// Logs merged peers.
#[derive(Default)]
pub struct LogNotifier;
impl Notifier for LogNotifier {
  fn notify(&self, peer: Peer) {
    match &peer {
      Peer::Discovered(p) => info!(
        peer = %p.identity,
        status = ?p.status(),
        elapsed = p.heartbeat.elapsed_heartbeats,
        "peer discovered"
      ),
      Peer::Digest(d) => info!(peer = %d.identity, "peer digest recorded"),
    }
  }
}

#[cfg(test)]
use crate::peer::{HeartbeatState, Host, PeerDigest, PeerIdentity};

#[test]
fn test_channel_notifier() {
  let (notifier, mut rx) = ChannelNotifier::new();
  let peer = Peer::Digest(PeerDigest::new(
    PeerIdentity::new("x", Host::from("127.0.0.1"), 3000),
    HeartbeatState::new(1, 1),
  ));
  notifier.notify(peer.clone());
  assert_eq!(rx.try_recv().unwrap(), peer);
  drop(rx);
  // Must not panic once the receiver is gone.
  notifier.notify(peer);
}
