//! Minimal SNTP (RFC 4330) client, enough to measure the local clock offset.

use crate::peer::unix_millis;
use crate::status::ProbeError;
use std::time::Duration;
use tokio::net::UdpSocket;

const PACKET_LEN: usize = 48;
// Seconds between 1900-01-01 (NTP era 0) and 1970-01-01.
const NTP_UNIX_DELTA: u64 = 2_208_988_800;
const MODE_SERVER: u8 = 4;

/// Encodes Unix milliseconds as a 64 bit NTP timestamp.
pub fn ntp_timestamp(unix_ms: u64) -> [u8; 8] {
  let secs = unix_ms / 1000 + NTP_UNIX_DELTA;
  let frac = ((unix_ms % 1000) << 32) / 1000;
  let mut buf = [0u8; 8];
  buf[..4].copy_from_slice(&(secs as u32).to_be_bytes());
  buf[4..].copy_from_slice(&(frac as u32).to_be_bytes());
  buf
}

/// Decodes a 64 bit NTP timestamp to Unix milliseconds. Seconds below the Unix epoch are read as
/// NTP era 1 (after 2036).
pub fn unix_millis_of(ts: [u8; 8]) -> u64 {
  let mut secs = u32::from_be_bytes([ts[0], ts[1], ts[2], ts[3]]) as u64;
  let frac = u32::from_be_bytes([ts[4], ts[5], ts[6], ts[7]]) as u64;
  if secs < NTP_UNIX_DELTA {
    secs += 1 << 32;
  }
  (secs - NTP_UNIX_DELTA) * 1000 + ((frac * 1000 + (1 << 31)) >> 32)
}

/// Clock offset from the four timestamps of an exchange, in milliseconds. Positive when the
/// local clock is behind the server.
pub fn clock_offset(t1: u64, t2: u64, t3: u64, t4: u64) -> i64 {
  ((t2 as i64 - t1 as i64) + (t3 as i64 - t4 as i64)) / 2
}

/// Reads the server timestamps out of a reply to a request sent at `t1` and received at `t4`.
pub fn parse_reply(buf: &[u8], t1: u64, t4: u64) -> Result<i64, ProbeError> {
  if buf.len() < PACKET_LEN {
    return Err(ProbeError::Malformed(format!("short reply of {} bytes", buf.len())));
  }
  if buf[0] & 0x7 != MODE_SERVER {
    return Err(ProbeError::Malformed(format!("unexpected mode {}", buf[0] & 0x7)));
  }
  if buf[1] == 0 {
    return Err(ProbeError::Malformed("kiss-o'-death reply".to_string()));
  }
  let stamp = |at: usize| {
    let mut ts = [0u8; 8];
    ts.copy_from_slice(&buf[at..at + 8]);
    unix_millis_of(ts)
  };
  Ok(clock_offset(t1, stamp(32), stamp(40), t4))
}

/// Queries `server` (`host` or `host:port`, port 123 by default) once.
pub async fn query(server: &str, timeout: Duration) -> Result<i64, ProbeError> {
  let addr = if server.contains(':') {
    server.to_string()
  } else {
    format!("{}:123", server)
  };
  let exchange = async {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(addr.as_str()).await?;
    let mut req = [0u8; PACKET_LEN];
    // LI 0, version 3, client mode.
    req[0] = 0x1B;
    let t1 = unix_millis();
    req[40..48].copy_from_slice(&ntp_timestamp(t1));
    socket.send(&req).await?;
    let mut buf = [0u8; PACKET_LEN];
    let len = socket.recv(&mut buf).await?;
    let t4 = unix_millis();
    parse_reply(&buf[..len], t1, t4)
  };
  tokio::time::timeout(timeout, exchange)
    .await
    .map_err(|_| ProbeError::Timeout(server.to_string()))?
}

#[test]
fn test_timestamp_conversion() {
  for ms in [0u64, 1, 499, 500, 999, 1_000, 1_626_000_000_123].iter() {
    assert_eq!(unix_millis_of(ntp_timestamp(*ms)), *ms);
  }
  // 2036-02-07, where the 32 bit seconds field wraps.
  let era1 = ntp_timestamp(2_085_978_496_000);
  assert_eq!(era1[..4], [0, 0, 0, 0]);
  assert_eq!(unix_millis_of(era1), 2_085_978_496_000);
}

#[test]
fn test_offset() {
  // Server 5s ahead, 100ms round trip split evenly.
  assert_eq!(clock_offset(1_000, 6_050, 6_050, 1_100), 5_000);
  assert_eq!(clock_offset(6_000, 1_050, 1_050, 6_100), -5_000);
}

#[test]
fn test_rejects_bad_replies() {
  assert!(parse_reply(&[0u8; 20], 0, 0).is_err());
  let mut client_mode = [0u8; PACKET_LEN];
  client_mode[0] = 0x1B;
  client_mode[1] = 1;
  assert!(parse_reply(&client_mode, 0, 0).is_err());
  let mut kod = [0u8; PACKET_LEN];
  kod[0] = 0x1C;
  assert!(parse_reply(&kod, 0, 0).is_err());
}

#[tokio::test]
async fn test_query_local_server() {
  let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
  let addr = server.local_addr().unwrap();
  tokio::spawn(async move {
    let mut buf = [0u8; PACKET_LEN];
    let (_, from) = server.recv_from(&mut buf).await.unwrap();
    let mut t1 = [0u8; 8];
    t1.copy_from_slice(&buf[40..48]);
    let ahead = ntp_timestamp(unix_millis_of(t1) + 5_000);
    let mut reply = [0u8; PACKET_LEN];
    reply[0] = 0x1C;
    reply[1] = 1;
    reply[24..32].copy_from_slice(&t1);
    reply[32..40].copy_from_slice(&ahead);
    reply[40..48].copy_from_slice(&ahead);
    server.send_to(&reply, from).await.unwrap();
  });
  let offset = query(&addr.to_string(), Duration::from_secs(2)).await.unwrap();
  assert!((4_000..=5_000).contains(&offset), "offset {}", offset);
}
