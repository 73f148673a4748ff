use crate::gossip::Responder;
use crate::transport::{read_frame, write_frame, Request, Response, TransportError};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

/// Answers incoming gossip on `listener` until accepting fails.
pub async fn serve(listener: TcpListener, responder: Arc<Responder>) -> std::io::Result<()> {
  loop {
    let (stream, addr) = listener.accept().await?;
    let responder = responder.clone();
    tokio::spawn(async move {
      if let Err(e) = handle(stream, &responder).await {
        warn!(%addr, error = %e, "gossip connection failed");
      }
    });
  }
}

async fn handle(mut stream: TcpStream, responder: &Responder) -> Result<(), TransportError> {
  let res = match read_frame::<_, Request>(&mut stream).await? {
    Request::Syn(syn) => {
      debug!(initiator = %syn.initiator, digests = syn.known_peers.len(), "SYN received");
      match responder.on_syn(syn).await {
        Ok(syn_ack) => Response::SynAck(syn_ack),
        Err(e) => Response::Rejected(e.to_string()),
      }
    }
    Request::Ack(ack) => {
      debug!(initiator = %ack.initiator, peers = ack.requested_peers.len(), "ACK received");
      match responder.on_ack(ack).await {
        Ok(_) => Response::AckReceived,
        Err(e) => Response::Rejected(e.to_string()),
      }
    }
  };
  write_frame(&mut stream, &res).await
}
