use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use tokio::net::lookup_host;

/// The DNS name or IP address of the machine hosting a peer.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize)]
pub enum Host {
  DNS(String),
  IP(IpAddr),
}
impl From<String> for Host {
  fn from(s: String) -> Self {
    match IpAddr::from_str(s.as_str()) {
      Ok(ip) => Host::IP(ip),
      Err(_) => Host::DNS(s),
    }
  }
}
impl From<&str> for Host {
  fn from(s: &str) -> Self {
    Host::from(s.to_string())
  }
}
impl From<IpAddr> for Host {
  fn from(ip: IpAddr) -> Self {
    Host::IP(ip)
  }
}
impl fmt::Display for Host {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Host::DNS(s) => write!(f, "{}", s),
      Host::IP(IpAddr::V6(ip)) => write!(f, "[{}]", ip),
      Host::IP(ip) => write!(f, "{}", ip),
    }
  }
}
impl Default for Host {
  fn default() -> Self {
    Host::IP(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
  }
}

/// The public key of a cluster member. The protocol never looks inside it, it is only compared.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize)]
pub struct PublicKey(String);
impl PublicKey {
  pub fn new<S: Into<String>>(key: S) -> Self {
    PublicKey(key.into())
  }

  pub fn as_str(&self) -> &str {
    self.0.as_str()
  }
}
impl From<&str> for PublicKey {
  fn from(s: &str) -> Self {
    PublicKey(s.to_string())
  }
}
impl From<String> for PublicKey {
  fn from(s: String) -> Self {
    PublicKey(s)
  }
}
impl fmt::Display for PublicKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Identifies a cluster member. Immutable for the lifetime of a peer record.
///
/// Equality and hashing only look at the [`PublicKey`]: the same key announced from two different
/// endpoints is the same member.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PeerIdentity {
  pub public_key: PublicKey,
  /// The DNS name or IP address the peer accepts gossip on.
  pub host: Host,
  /// The TCP port the peer accepts gossip on.
  pub port: u16,
}
impl PeerIdentity {
  pub fn new<K: Into<PublicKey>>(public_key: K, host: Host, port: u16) -> PeerIdentity {
    PeerIdentity {
      public_key: public_key.into(),
      host: host,
      port: port,
    }
  }

  pub fn key(&self) -> &PublicKey {
    &self.public_key
  }

  /// `host:port`, the address this peer claims to listen on.
  pub fn endpoint(&self) -> String {
    format!("{}:{}", self.host, self.port)
  }

  /// True if `other` names the same node, either by key or by endpoint. A node uses this to
  /// recognize itself in peer lists it receives.
  pub fn is_same_node(&self, other: &PeerIdentity) -> bool {
    self == other || self.endpoint() == other.endpoint()
  }

  /// Resolves the endpoint of this peer into raw socket addresses. If the [`Host`] is a DNS name,
  /// this performs a lookup. Only returns an error if the lookup fails.
  pub async fn resolve(&self) -> std::io::Result<Vec<SocketAddr>> {
    match &self.host {
      Host::IP(ip) => Ok(vec![SocketAddr::new(*ip, self.port)]),
      Host::DNS(s) => lookup_host((s.as_str(), self.port)).await.map(|x| x.collect()),
    }
  }
}
impl PartialEq for PeerIdentity {
  fn eq(&self, other: &Self) -> bool {
    self.public_key == other.public_key
  }
}
impl Eq for PeerIdentity {}
impl Hash for PeerIdentity {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.public_key.hash(state);
  }
}
impl fmt::Display for PeerIdentity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}@{}:{}", self.public_key, self.host, self.port)
  }
}

#[cfg(test)]
use std::collections::HashSet;

#[test]
fn test_identity_equality_is_by_key() {
  let a = PeerIdentity::new("key-a", Host::from("10.0.0.1"), 3000);
  let moved = PeerIdentity::new("key-a", Host::from("10.0.0.2"), 4000);
  let other = PeerIdentity::new("key-b", Host::from("10.0.0.1"), 3000);
  assert_eq!(a, moved);
  assert_ne!(a, other);
  let set: HashSet<_> = vec![a.clone(), moved, other].into_iter().collect();
  assert_eq!(set.len(), 2);
}

#[test]
fn test_same_node_by_endpoint() {
  let me = PeerIdentity::new("me", Host::from("127.0.0.1"), 3000);
  let seed_alias = PeerIdentity::new("seed-0", Host::from("127.0.0.1"), 3000);
  let elsewhere = PeerIdentity::new("seed-1", Host::from("127.0.0.1"), 3001);
  assert!(me.is_same_node(&seed_alias));
  assert!(!me.is_same_node(&elsewhere));
}

#[test]
fn test_host_parsing_and_endpoint() {
  assert_eq!(Host::from("localhost"), Host::DNS("localhost".to_string()));
  let v6 = PeerIdentity::new("k", Host::from("::1"), 80);
  assert_eq!(v6.endpoint(), "[::1]:80");
  let v4 = PeerIdentity::new("k", Host::from("192.168.1.4"), 3002);
  assert_eq!(v4.endpoint(), "192.168.1.4:3002");
  assert_eq!(v4.to_string(), "k@192.168.1.4:3002");
}
