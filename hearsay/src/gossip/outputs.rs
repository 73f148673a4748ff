use crate::error::GossipError;
use crate::peer::{DiscoveredPeer, PeerIdentity};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// The four streams every round of a cycle writes into. Cloned once per round.
#[derive(Clone)]
pub struct RoundOutputs {
  discovered: UnboundedSender<DiscoveredPeer>,
  reachable: UnboundedSender<PeerIdentity>,
  unreachable: UnboundedSender<PeerIdentity>,
  errors: UnboundedSender<GossipError>,
}
impl RoundOutputs {
  // Sends only fail once the inbox is gone, and then nobody wants the result anyway.
  pub fn discovered(&self, peer: DiscoveredPeer) {
    let _ = self.discovered.send(peer);
  }

  pub fn reachable(&self, target: PeerIdentity) {
    let _ = self.reachable.send(target);
  }

  pub fn unreachable(&self, target: PeerIdentity) {
    let _ = self.unreachable.send(target);
  }

  pub fn error(&self, error: GossipError) {
    let _ = self.errors.send(error);
  }
}

/// The receiving ends of [`RoundOutputs`].
pub struct RoundInbox {
  discovered: UnboundedReceiver<DiscoveredPeer>,
  reachable: UnboundedReceiver<PeerIdentity>,
  unreachable: UnboundedReceiver<PeerIdentity>,
  errors: UnboundedReceiver<GossipError>,
}
impl RoundInbox {
  /// Collects everything sent so far. Call once every round has joined.
  pub fn drain(mut self, targets: Vec<PeerIdentity>) -> CycleReport {
    let mut report = CycleReport {
      targets: targets,
      ..Default::default()
    };
    while let Ok(p) = self.discovered.try_recv() {
      report.discovered.push(p);
    }
    while let Ok(t) = self.reachable.try_recv() {
      report.reachable.push(t);
    }
    while let Ok(t) = self.unreachable.try_recv() {
      report.unreachable.push(t);
    }
    while let Ok(e) = self.errors.try_recv() {
      report.errors.push(e);
    }
    report
  }
}

pub fn round_channels() -> (RoundOutputs, RoundInbox) {
  let (discovered_tx, discovered_rx) = unbounded_channel();
  let (reachable_tx, reachable_rx) = unbounded_channel();
  let (unreachable_tx, unreachable_rx) = unbounded_channel();
  let (errors_tx, errors_rx) = unbounded_channel();
  let outputs = RoundOutputs {
    discovered: discovered_tx,
    reachable: reachable_tx,
    unreachable: unreachable_tx,
    errors: errors_tx,
  };
  let inbox = RoundInbox {
    discovered: discovered_rx,
    reachable: reachable_rx,
    unreachable: unreachable_rx,
    errors: errors_rx,
  };
  (outputs, inbox)
}

/// Everything the rounds of one cycle produced.
#[derive(Debug, Default)]
pub struct CycleReport {
  /// The peers selected for this cycle, one round each.
  pub targets: Vec<PeerIdentity>,
  pub discovered: Vec<DiscoveredPeer>,
  pub reachable: Vec<PeerIdentity>,
  pub unreachable: Vec<PeerIdentity>,
  pub errors: Vec<GossipError>,
}
