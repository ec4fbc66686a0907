//! Identifier types for creditgate.
//!
//! Principals and promo usages are UUID-based; ledger transactions use ULIDs so
//! that identifiers sort in creation order.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Define a UUID-backed identifier newtype with string serialization.
macro_rules! uuid_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Wrap an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Generate a new random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Return the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }

            /// Return the 16 raw bytes.
            #[must_use]
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                uuid::Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|_| IdError::InvalidUuid)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }
    };
}

uuid_id_type!(
    PrincipalId,
    "An authenticated principal (user) identifier.\n\nExtracted from the JWT `sub` claim."
);
uuid_id_type!(PromoUsageId, "Identifier of a single promo usage row.");

/// A ledger transaction identifier.
///
/// ULIDs embed their creation time, so ordering by id is ordering by time.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransactionId(Ulid);

impl TransactionId {
    /// Generate an id stamped with the given instant.
    #[must_use]
    pub fn at(time: DateTime<Utc>) -> Self {
        Self(Ulid::from_datetime(SystemTime::from(time)))
    }

    /// Return the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> &Ulid {
        &self.0
    }

    /// Return the 16 raw bytes (big-endian, time-ordered).
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 16] {
        self.0.to_bytes()
    }

    /// Rebuild an id from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Ulid::from_bytes(bytes))
    }
}

impl FromStr for TransactionId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|_| IdError::InvalidUlid)
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self.0)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for TransactionId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TransactionId> for String {
    fn from(id: TransactionId) -> Self {
        id.0.to_string()
    }
}

/// The identity a rate-limit quota is tracked against.
///
/// Authenticated traffic is tracked per principal, anonymous traffic per IP.
/// The two are never merged: a request that resolves a principal is counted
/// only under that principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Identity {
    /// An authenticated principal.
    Principal(PrincipalId),
    /// An anonymous caller, by source address.
    Ip(IpAddr),
}

impl Identity {
    /// Resolve the identity for a request: the principal if known, else the IP.
    #[must_use]
    pub fn resolve(principal: Option<PrincipalId>, ip: IpAddr) -> Self {
        principal.map_or(Self::Ip(ip), Self::Principal)
    }

    /// The storage key for this identity (`user:<uuid>` or `ip:<addr>`).
    #[must_use]
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Principal(id) => write!(f, "user:{id}"),
            Self::Ip(ip) => write!(f, "ip:{ip}"),
        }
    }
}

impl FromStr for Identity {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(id) = s.strip_prefix("user:") {
            return id.parse().map(Self::Principal);
        }
        if let Some(ip) = s.strip_prefix("ip:") {
            return ip
                .parse()
                .map(Self::Ip)
                .map_err(|_| IdError::InvalidIdentity(s.to_string()));
        }
        Err(IdError::InvalidIdentity(s.to_string()))
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not a valid UUID.
    #[error("invalid UUID format")]
    InvalidUuid,

    /// The input is not a valid ULID.
    #[error("invalid ULID format")]
    InvalidUlid,

    /// The input is not a `user:<uuid>` or `ip:<addr>` identity.
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn principal_id_serde_json() {
        let id = PrincipalId::generate();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: PrincipalId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn principal_id_rejects_garbage() {
        assert_eq!("not-a-uuid".parse::<PrincipalId>(), Err(IdError::InvalidUuid));
    }

    #[test]
    fn transaction_ids_sort_by_time() {
        let earlier = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 1).unwrap();
        assert!(TransactionId::at(earlier) < TransactionId::at(later));
    }

    #[test]
    fn transaction_id_bytes_preserve_identity() {
        let id = TransactionId::at(Utc::now());
        assert_eq!(TransactionId::from_bytes(id.to_bytes()), id);
    }

    #[test]
    fn identity_prefers_principal() {
        let principal = PrincipalId::generate();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        assert_eq!(
            Identity::resolve(Some(principal), ip),
            Identity::Principal(principal)
        );
        assert_eq!(Identity::resolve(None, ip), Identity::Ip(ip));
    }

    #[test]
    fn identity_key_parses_back() {
        let principal = Identity::Principal(PrincipalId::generate());
        let ip = Identity::Ip("2001:db8::1".parse().unwrap());

        assert_eq!(principal.key().parse::<Identity>().unwrap(), principal);
        assert_eq!(ip.key().parse::<Identity>().unwrap(), ip);
        assert!("host:example".parse::<Identity>().is_err());
    }
}
