use crate::gossip::{Ack, Syn, SynAck};
use crate::peer::PeerIdentity;
use crate::transport::{read_frame, write_frame, Request, Response, Transport, TransportError};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

/// Sends each gossip message over its own TCP connection.
#[derive(Clone, Debug)]
pub struct TcpTransport {
  connect_timeout: Duration,
  io_timeout: Duration,
}
impl TcpTransport {
  pub fn new(connect_timeout: Duration, io_timeout: Duration) -> TcpTransport {
    TcpTransport {
      connect_timeout: connect_timeout,
      io_timeout: io_timeout,
    }
  }

  async fn connect(&self, target: &PeerIdentity) -> Result<TcpStream, TransportError> {
    let addrs = target
      .resolve()
      .await
      .map_err(|e| TransportError::Unreachable(format!("cannot resolve {}: {}", target, e)))?;
    // Every address is tried. A hard error is only returned if no address looked unreachable.
    let mut last = None;
    let mut hard = None;
    for addr in addrs {
      match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => return Ok(stream),
        Ok(Err(e)) if is_unreachable(e.kind()) => last = Some(format!("{}: {}", addr, e)),
        Ok(Err(e)) => {
          trace!(to = %target, %addr, error = %e, "connect failed");
          hard = Some(e);
        }
        Err(_) => last = Some(format!("{}: connect timed out", addr)),
      }
    }
    match (last, hard) {
      (None, Some(e)) => Err(TransportError::Io(e)),
      (Some(last), _) => Err(TransportError::Unreachable(last)),
      (None, None) => Err(TransportError::Unreachable(format!("no address for {}", target))),
    }
  }

  async fn call(&self, target: &PeerIdentity, req: Request) -> Result<Response, TransportError> {
    let mut stream = self.connect(target).await?;
    trace!(to = %target, "connected");
    let exchange = async {
      write_frame(&mut stream, &req).await?;
      read_frame::<_, Response>(&mut stream).await
    };
    match timeout(self.io_timeout, exchange).await {
      Ok(Err(TransportError::Io(e))) if is_unreachable(e.kind()) => {
        Err(TransportError::Unreachable(format!("{}: {}", target, e)))
      }
      Ok(res) => res,
      Err(_) => Err(TransportError::Unreachable(format!("{}: no answer", target))),
    }
  }
}
impl Default for TcpTransport {
  fn default() -> Self {
    TcpTransport::new(Duration::from_millis(500), Duration::from_secs(2))
  }
}
#[async_trait]
impl Transport for TcpTransport {
  async fn send_syn(&self, target: &PeerIdentity, syn: Syn) -> Result<SynAck, TransportError> {
    match self.call(target, Request::Syn(syn)).await? {
      Response::SynAck(syn_ack) => Ok(syn_ack),
      Response::Rejected(reason) => Err(TransportError::Remote(reason)),
      other => Err(TransportError::Remote(format!("unexpected answer to SYN: {:?}", other))),
    }
  }

  async fn send_ack(&self, target: &PeerIdentity, ack: Ack) -> Result<(), TransportError> {
    match self.call(target, Request::Ack(ack)).await? {
      Response::AckReceived => Ok(()),
      Response::Rejected(reason) => Err(TransportError::Remote(reason)),
      other => Err(TransportError::Remote(format!("unexpected answer to ACK: {:?}", other))),
    }
  }
}

fn is_unreachable(kind: ErrorKind) -> bool {
  matches!(
    kind,
    ErrorKind::ConnectionRefused
      | ErrorKind::ConnectionReset
      | ErrorKind::ConnectionAborted
      | ErrorKind::NotConnected
      | ErrorKind::BrokenPipe
      | ErrorKind::TimedOut
      | ErrorKind::AddrNotAvailable
      | ErrorKind::HostUnreachable
      | ErrorKind::NetworkUnreachable
      | ErrorKind::UnexpectedEof
  )
}

#[cfg(test)]
use crate::peer::Host;

#[tokio::test]
async fn test_closed_port_is_unreachable() {
  let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
  let port = listener.local_addr().unwrap().port();
  drop(listener);
  let target = PeerIdentity::new("gone", Host::from("127.0.0.1"), port);
  let transport = TcpTransport::default();
  let syn = Syn {
    initiator: PeerIdentity::new("me", Host::from("127.0.0.1"), 1),
    known_peers: vec![],
  };
  let err = transport.send_syn(&target, syn).await.unwrap_err();
  assert!(err.is_unreachable(), "{:?}", err);
}

#[test]
fn test_routing_failures_are_unreachable() {
  for kind in [
    ErrorKind::HostUnreachable,
    ErrorKind::NetworkUnreachable,
    ErrorKind::UnexpectedEof,
    ErrorKind::ConnectionRefused,
    ErrorKind::TimedOut,
  ]
  .iter()
  {
    assert!(is_unreachable(*kind), "{:?}", kind);
  }
  assert!(!is_unreachable(ErrorKind::PermissionDenied));
  assert!(!is_unreachable(ErrorKind::InvalidData));
}

#[tokio::test]
async fn test_hangup_before_answer_is_unreachable() {
  let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
  let port = listener.local_addr().unwrap().port();
  tokio::spawn(async move {
    // Read the request, then close without answering.
    let (mut stream, _) = listener.accept().await.unwrap();
    let _ = read_frame::<_, Request>(&mut stream).await;
  });
  let target = PeerIdentity::new("mute", Host::from("127.0.0.1"), port);
  let syn = Syn {
    initiator: PeerIdentity::new("me", Host::from("127.0.0.1"), 1),
    known_peers: vec![],
  };
  let err = TcpTransport::default().send_syn(&target, syn).await.unwrap_err();
  assert!(err.is_unreachable(), "{:?}", err);
}
