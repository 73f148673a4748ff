use crate::transport::TransportError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

pub fn encode<T: Serialize>(item: &T) -> Result<Vec<u8>, TransportError> {
  Ok(serde_cbor::to_vec(item)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, TransportError> {
  Ok(serde_cbor::from_slice(bytes)?)
}

// Frames are big endian length prefixed.
pub async fn write_frame<W, T>(writer: &mut W, item: &T) -> Result<(), TransportError>
where
  W: AsyncWrite + Unpin,
  T: Serialize,
{
  let bytes = encode(item)?;
  if bytes.len() > MAX_FRAME_SIZE {
    return Err(TransportError::FrameTooLarge(bytes.len()));
  }
  writer.write_u32(bytes.len() as u32).await?;
  writer.write_all(&bytes[..]).await?;
  writer.flush().await?;
  Ok(())
}

pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, TransportError>
where
  R: AsyncRead + Unpin,
  T: DeserializeOwned,
{
  let len = reader.read_u32().await? as usize;
  if len > MAX_FRAME_SIZE {
    return Err(TransportError::FrameTooLarge(len));
  }
  let mut buf = vec![0u8; len];
  reader.read_exact(&mut buf[..]).await?;
  decode(&buf[..])
}

#[cfg(test)]
use crate::gossip::{Syn, SynAck};
#[cfg(test)]
use crate::peer::{HeartbeatState, Host, PeerDigest, PeerIdentity};
#[cfg(test)]
use crate::transport::{Request, Response};
#[cfg(test)]
use tokio_test::block_on;

#[tokio::test]
async fn test_frames_over_a_pipe() {
  let (mut client, mut server) = tokio::io::duplex(1024);
  let me = PeerIdentity::new("me", Host::from("127.0.0.1"), 3000);
  let syn = Syn {
    initiator: me.clone(),
    known_peers: vec![PeerDigest::new(me, HeartbeatState::new(10, 20))],
  };
  write_frame(&mut client, &Request::Syn(syn.clone())).await.unwrap();
  match read_frame::<_, Request>(&mut server).await.unwrap() {
    Request::Syn(received) => assert_eq!(received, syn),
    other => panic!("unexpected request {:?}", other),
  }
  write_frame(&mut server, &Response::SynAck(SynAck::default())).await.unwrap();
  assert!(matches!(
    read_frame::<_, Response>(&mut client).await.unwrap(),
    Response::SynAck(_)
  ));
}

#[test]
fn test_oversized_frame_is_refused() {
  let (mut client, mut server) = tokio::io::duplex(64);
  block_on(client.write_u32((MAX_FRAME_SIZE + 1) as u32)).unwrap();
  assert!(matches!(
    block_on(read_frame::<_, Request>(&mut server)),
    Err(TransportError::FrameTooLarge(_))
  ));
}
