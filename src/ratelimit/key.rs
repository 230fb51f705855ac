//! Client identity and bucket key handling.

use std::fmt;
use std::net::IpAddr;

/// An opaque token identifying a requester.
///
/// Nothing is assumed about its structure beyond equality and hashing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(String);

impl ClientId {
    /// Create a new client identity.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<IpAddr> for ClientId {
    fn from(addr: IpAddr) -> Self {
        Self(addr.to_string())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A key that identifies one one-second bucket of one client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    /// The client the bucket belongs to
    pub client: ClientId,
    /// Epoch second covered by the bucket
    pub second: u64,
}

impl BucketKey {
    /// Create a new bucket key.
    pub fn new(client: ClientId, second: u64) -> Self {
        Self { client, second }
    }

    /// Convert the bucket key to its storage representation.
    ///
    /// Format: `{client}:{second}`
    pub fn to_storage_key(&self) -> String {
        format!("{}:{}", self.client, self.second)
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.client, self.second)
    }
}
