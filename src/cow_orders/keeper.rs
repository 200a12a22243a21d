//! Keeper queue encoding and deterministic keeper selection.
//!
//! Wire layout of a non-empty queue:
//!
//! ```text
//! version (1) | retries (32, big-endian) | count (4, big-endian) | address (20) * count
//! ```
//!
//! The empty queue is the empty byte string.

use ethers::types::{Address, H256, U256};
use std::collections::BTreeSet;

use crate::eip712::encoding::strip_0x;
use crate::error::CodecError;

pub const KEEPER_QUEUE_VERSION: u8 = 0x01;

const HEADER_LEN: usize = 1 + 32 + 4;
const ADDRESS_LEN: usize = 20;

/// Ordered keepers for the current order plus the number of selections so far
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeeperQueue {
    pub retries: u64,
    pub keepers: Vec<Address>,
}

impl KeeperQueue {
    pub fn new(retries: u64, keepers: Vec<Address>) -> Self {
        Self { retries, keepers }
    }

    pub fn is_empty(&self) -> bool {
        self.keepers.is_empty()
    }

    /// Keeper in priority
    pub fn head(&self) -> Option<Address> {
        self.keepers.first().copied()
    }

    pub fn encode(&self) -> Vec<u8> {
        if self.keepers.is_empty() {
            return Vec::new();
        }

        let mut out = Vec::with_capacity(HEADER_LEN + ADDRESS_LEN * self.keepers.len());
        out.push(KEEPER_QUEUE_VERSION);
        let mut retries = [0u8; 32];
        U256::from(self.retries).to_big_endian(&mut retries);
        out.extend_from_slice(&retries);
        out.extend_from_slice(&(self.keepers.len() as u32).to_be_bytes());
        for keeper in &self.keepers {
            out.extend_from_slice(keeper.as_bytes());
        }
        out
    }

    pub fn decode(raw: &[u8]) -> Result<Self, CodecError> {
        if raw.is_empty() {
            return Ok(Self::default());
        }
        if raw[0] != KEEPER_QUEUE_VERSION {
            return Err(CodecError::InvalidKeeperQueue(format!(
                "unsupported version {:#04x}",
                raw[0]
            )));
        }
        if raw.len() < HEADER_LEN {
            return Err(CodecError::InvalidKeeperQueue(format!(
                "truncated header: {} bytes",
                raw.len()
            )));
        }

        let retries = U256::from_big_endian(&raw[1..33]);
        if retries.bits() > 64 {
            return Err(CodecError::InvalidKeeperQueue(format!(
                "retry counter {} does not fit u64",
                retries
            )));
        }

        let mut count = [0u8; 4];
        count.copy_from_slice(&raw[33..HEADER_LEN]);
        let count = u32::from_be_bytes(count) as usize;
        if count == 0 {
            return Err(CodecError::InvalidKeeperQueue(
                "empty queue must be encoded as empty bytes".to_string(),
            ));
        }

        let body = &raw[HEADER_LEN..];
        let expected = count
            .checked_mul(ADDRESS_LEN)
            .ok_or_else(|| CodecError::InvalidKeeperQueue(format!("count {} too large", count)))?;
        if body.len() < expected {
            return Err(CodecError::InvalidKeeperQueue(format!(
                "truncated: {} keepers need {} bytes, got {}",
                count,
                expected,
                body.len()
            )));
        }
        if body.len() > expected {
            return Err(CodecError::InvalidKeeperQueue(format!(
                "{} trailing bytes",
                body.len() - expected
            )));
        }

        Ok(Self {
            retries: retries.as_u64(),
            keepers: body.chunks(ADDRESS_LEN).map(Address::from_slice).collect(),
        })
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.encode()))
    }

    pub fn from_hex(s: &str) -> Result<Self, CodecError> {
        let raw = hex::decode(strip_0x(s))
            .map_err(|e| CodecError::InvalidKeeperQueue(format!("invalid hex: {}", e)))?;
        Self::decode(&raw)
    }
}

/// Map agreed randomness to a value in `[0, 1)`.
pub fn randomness_to_unit(randomness: &H256) -> f64 {
    let mut top = [0u8; 8];
    top.copy_from_slice(&randomness.as_bytes()[..8]);
    (u64::from_be_bytes(top) >> 11) as f64 / (1u64 << 53) as f64
}

/// Pick the next keeper from the sorted participants, skipping blacklisted
/// ones unless that would leave nobody.
pub fn select_keeper(
    participants: &BTreeSet<Address>,
    blacklist: &BTreeSet<Address>,
    randomness: &H256,
) -> Option<Address> {
    let mut candidates: Vec<Address> = participants
        .iter()
        .filter(|p| !blacklist.contains(p))
        .copied()
        .collect();
    if candidates.is_empty() {
        candidates = participants.iter().copied().collect();
    }
    if candidates.is_empty() {
        return None;
    }

    let index = (randomness_to_unit(randomness) * candidates.len() as f64) as usize;
    candidates.get(index.min(candidates.len() - 1)).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addresses(n: u64) -> Vec<Address> {
        (1..=n).map(Address::from_low_u64_be).collect()
    }

    #[test]
    fn test_queue_round_trip() {
        let queue = KeeperQueue::new(3, addresses(2));
        let encoded = queue.encode();
        assert_eq!(encoded.len(), 1 + 32 + 4 + 40);
        assert_eq!(encoded[0], KEEPER_QUEUE_VERSION);
        assert_eq!(KeeperQueue::decode(&encoded).unwrap(), queue);
        assert_eq!(KeeperQueue::from_hex(&queue.to_hex()).unwrap(), queue);
    }

    #[test]
    fn test_empty_queue_is_empty_bytes() {
        let empty = KeeperQueue::default();
        assert!(empty.encode().is_empty());
        assert_eq!(empty.to_hex(), "0x");
        assert_eq!(KeeperQueue::from_hex("0x").unwrap(), empty);
        assert_eq!(empty.head(), None);
    }

    #[test]
    fn test_decode_rejects_malformed_input() {
        let valid = KeeperQueue::new(1, addresses(1)).encode();

        let mut bad_version = valid.clone();
        bad_version[0] = 0x02;
        assert!(KeeperQueue::decode(&bad_version).is_err());

        assert!(KeeperQueue::decode(&valid[..valid.len() - 1]).is_err());
        assert!(KeeperQueue::decode(&valid[..10]).is_err());

        let mut trailing = valid.clone();
        trailing.push(0);
        assert!(KeeperQueue::decode(&trailing).is_err());

        let mut huge_retries = valid;
        huge_retries[1] = 0x01;
        let err = KeeperQueue::decode(&huge_retries).unwrap_err();
        assert!(err.to_string().contains("does not fit u64"));
    }

    #[test]
    fn test_select_keeper_is_deterministic_and_skips_blacklist() {
        let participants: BTreeSet<Address> = addresses(4).into_iter().collect();
        let none = BTreeSet::new();

        // Zero randomness picks the first, all-ones the last
        assert_eq!(
            select_keeper(&participants, &none, &H256::zero()),
            Some(Address::from_low_u64_be(1))
        );
        assert_eq!(
            select_keeper(&participants, &none, &H256::repeat_byte(0xff)),
            Some(Address::from_low_u64_be(4))
        );

        let blacklist: BTreeSet<Address> = [Address::from_low_u64_be(1)].into_iter().collect();
        assert_eq!(
            select_keeper(&participants, &blacklist, &H256::zero()),
            Some(Address::from_low_u64_be(2))
        );

        // Everyone blacklisted: the blacklist is ignored
        assert_eq!(
            select_keeper(&participants, &participants, &H256::zero()),
            Some(Address::from_low_u64_be(1))
        );
        assert_eq!(select_keeper(&BTreeSet::new(), &none, &H256::zero()), None);
    }

    #[test]
    fn test_randomness_to_unit_range() {
        assert_eq!(randomness_to_unit(&H256::zero()), 0.0);
        let high = randomness_to_unit(&H256::repeat_byte(0xff));
        assert!(high < 1.0 && high > 0.99);
    }

    #[test]
    fn test_select_keeper_splits_unit_interval_evenly() {
        let participants: BTreeSet<Address> = addresses(4).into_iter().collect();
        let none = BTreeSet::new();

        // 0x40.. is exactly 1/4, the start of the second slot
        let mut quarter = [0u8; 32];
        quarter[0] = 0x40;
        assert_eq!(
            select_keeper(&participants, &none, &H256::from(quarter)),
            Some(Address::from_low_u64_be(2))
        );
        quarter[0] = 0x3f;
        quarter[1] = 0xff;
        assert_eq!(
            select_keeper(&participants, &none, &H256::from(quarter)),
            Some(Address::from_low_u64_be(1))
        );
    }
}
