//! Key encoding utilities for `RocksDB`.
//!
//! Composite keys join variable-length text parts with a `0x00` separator and
//! append fixed-width big-endian integers, so prefix scans follow time order.

use chrono::{DateTime, Utc};

use creditgate_core::{PrincipalId, TransactionId};

const SEP: u8 = 0;

/// Create an account key from a principal.
#[must_use]
pub fn account_key(principal: &PrincipalId) -> Vec<u8> {
    principal.as_bytes().to_vec()
}

/// Create a transaction key from a transaction ID.
#[must_use]
pub fn transaction_key(id: &TransactionId) -> Vec<u8> {
    id.to_bytes().to_vec()
}

/// The smallest transaction key that can carry a timestamp at or after `since`.
///
/// ULIDs start with a 48-bit millisecond timestamp.
#[must_use]
pub fn transaction_lower_bound(since: DateTime<Utc>) -> [u8; 16] {
    let millis = u64::try_from(since.timestamp_millis()).unwrap_or(0);
    let mut bytes = [0u8; 16];
    bytes[..6].copy_from_slice(&millis.to_be_bytes()[2..]);
    bytes
}

/// Create a principal-transaction index key.
///
/// Format: `principal_id (16 bytes) || transaction_id (16 bytes)`
#[must_use]
pub fn principal_transaction_key(principal: &PrincipalId, id: &TransactionId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(principal.as_bytes());
    key.extend_from_slice(&id.to_bytes());
    key
}

/// Extract the transaction ID from a principal-transaction index key.
#[must_use]
pub fn transaction_id_from_index(key: &[u8]) -> Option<TransactionId> {
    let bytes: [u8; 16] = key.get(16..32)?.try_into().ok()?;
    Some(TransactionId::from_bytes(bytes))
}

/// Prefix covering every rate-limit record of `identity`.
#[must_use]
pub fn identity_prefix(identity: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(identity.len() + 1);
    key.extend_from_slice(identity.as_bytes());
    key.push(SEP);
    key
}

/// Prefix covering the records of one `(identity, endpoint)` pair.
#[must_use]
pub fn rate_limit_prefix(identity: &str, endpoint: &str) -> Vec<u8> {
    let mut key = identity_prefix(identity);
    key.extend_from_slice(endpoint.as_bytes());
    key.push(SEP);
    key
}

/// Create a rate-limit record key.
///
/// Format: `identity \0 endpoint \0 start_millis (8 bytes) || seq (4 bytes)`.
/// The sequence keeps records admitted in the same millisecond apart.
#[must_use]
pub fn rate_limit_key(identity: &str, endpoint: &str, start: DateTime<Utc>, seq: u32) -> Vec<u8> {
    let mut key = rate_limit_prefix(identity, endpoint);
    let millis = u64::try_from(start.timestamp_millis()).unwrap_or(0);
    key.extend_from_slice(&millis.to_be_bytes());
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// Create a promo code key.
#[must_use]
pub fn promo_key(code: &str) -> Vec<u8> {
    code.as_bytes().to_vec()
}

/// Prefix covering every usage row of `code`.
#[must_use]
pub fn promo_usage_code_prefix(code: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(code.len() + 1);
    key.extend_from_slice(code.as_bytes());
    key.push(SEP);
    key
}

/// Prefix covering one principal's usage rows of `code`.
#[must_use]
pub fn promo_usage_prefix(code: &str, principal: &PrincipalId) -> Vec<u8> {
    let mut key = promo_usage_code_prefix(code);
    key.extend_from_slice(principal.as_bytes());
    key
}

/// Create a promo usage key.
///
/// Format: `code \0 principal_id (16 bytes) || slot (4 bytes)`. One key per
/// slot, so a slot can only be taken once.
#[must_use]
pub fn promo_usage_key(code: &str, principal: &PrincipalId, slot: u32) -> Vec<u8> {
    let mut key = promo_usage_prefix(code, principal);
    key.extend_from_slice(&slot.to_be_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn principal_transaction_key_format() {
        let principal = PrincipalId::generate();
        let id = TransactionId::at(Utc::now());
        let key = principal_transaction_key(&principal, &id);

        assert_eq!(key.len(), 32);
        assert_eq!(&key[..16], principal.as_bytes());
        assert_eq!(transaction_id_from_index(&key), Some(id));
        assert_eq!(transaction_id_from_index(&key[..20]), None);
    }

    #[test]
    fn lower_bound_precedes_ids_from_that_instant() {
        let at = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        let bound = transaction_lower_bound(at);
        assert!(bound.as_slice() <= TransactionId::at(at).to_bytes().as_slice());
        assert!(bound.as_slice() > TransactionId::at(at - Duration::seconds(1)).to_bytes().as_slice());
    }

    #[test]
    fn rate_limit_keys_sort_by_time() {
        let t = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        let early = rate_limit_key("ip:1.2.3.4", "/api", t, 9);
        let late = rate_limit_key("ip:1.2.3.4", "/api", t + Duration::milliseconds(1), 0);
        assert!(early < late);
        assert!(early.starts_with(&rate_limit_prefix("ip:1.2.3.4", "/api")));
        assert!(early.starts_with(&identity_prefix("ip:1.2.3.4")));
        assert!(!early.starts_with(&identity_prefix("ip:1.2.3")));
    }

    #[test]
    fn promo_usage_key_format() {
        let principal = PrincipalId::generate();
        let key = promo_usage_key("WELCOME", &principal, 1);
        assert_eq!(key.len(), "WELCOME".len() + 1 + 16 + 4);
        assert!(key.starts_with(&promo_usage_prefix("WELCOME", &principal)));
    }
}
