use ethers::types::{Address, H256};
use ethers::utils::keccak256;
use serde_json::Value;
use std::collections::BTreeSet;
use std::str::FromStr;

use super::keeper::KeeperQueue;
use crate::consensus::ReplicatedState;
use crate::eip712::ReadyOrder;
use crate::error::{Result, WatchtowerError};

/// Replicated state keys
pub mod keys {
    pub const MOST_VOTED_RANDOMNESS: &str = "most_voted_randomness";
    pub const MOST_VOTED_RANDOMNESS_ROUND: &str = "most_voted_randomness_round";
    pub const KEEPERS: &str = "keepers";
    pub const BLACKLISTED_KEEPERS: &str = "blacklisted_keepers";
    pub const ORDER: &str = "order";
    pub const ORDER_UID: &str = "order_uid";
    pub const VERIFIED_ORDER: &str = "verified_order";
    pub const VERIFIED_ORDERS: &str = "verified_orders";
    pub const ABANDONED_ORDERS: &str = "abandoned_orders";
    pub const MAX_KEEPER_RETRIES: &str = "max_keeper_retries";
}

/// Stable identifier of an agreed order value: its `orderUid` when present,
/// otherwise the hash of its canonical encoding.
pub fn order_reference(order: &Value) -> String {
    match order.get("orderUid").and_then(Value::as_str) {
        Some(uid) => uid.to_lowercase(),
        None => format!("0x{}", hex::encode(keccak256(order.to_string().as_bytes()))),
    }
}

fn invalid(key: &str, reason: impl ToString) -> WatchtowerError {
    WatchtowerError::InvalidStateValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

/// Typed view over the order lifecycle keys
#[derive(Debug, Clone, Copy)]
pub struct SynchronizedData<'a> {
    state: &'a ReplicatedState,
}

impl<'a> SynchronizedData<'a> {
    pub fn new(state: &'a ReplicatedState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &'a ReplicatedState {
        self.state
    }

    pub fn participants(&self) -> &'a BTreeSet<Address> {
        self.state.participants()
    }

    pub fn most_voted_randomness(&self) -> Result<H256> {
        let value = self.state.get_strict(keys::MOST_VOTED_RANDOMNESS)?;
        let s = value
            .as_str()
            .ok_or_else(|| invalid(keys::MOST_VOTED_RANDOMNESS, "expected a hex string"))?;
        H256::from_str(s).map_err(|e| invalid(keys::MOST_VOTED_RANDOMNESS, e))
    }

    pub fn most_voted_randomness_round(&self) -> Result<u64> {
        self.state
            .get_strict(keys::MOST_VOTED_RANDOMNESS_ROUND)?
            .as_u64()
            .ok_or_else(|| invalid(keys::MOST_VOTED_RANDOMNESS_ROUND, "expected an integer"))
    }

    pub fn keepers(&self) -> Result<KeeperQueue> {
        match self.state.get(keys::KEEPERS) {
            None | Some(Value::Null) => Ok(KeeperQueue::default()),
            Some(Value::String(s)) => Ok(KeeperQueue::from_hex(s)?),
            Some(_) => Err(invalid(keys::KEEPERS, "expected a hex string")),
        }
    }

    pub fn keeper_in_priority(&self) -> Result<Option<Address>> {
        Ok(self.keepers()?.head())
    }

    pub fn blacklisted_keepers(&self) -> Result<BTreeSet<Address>> {
        Ok(self
            .state
            .get_as::<BTreeSet<Address>>(keys::BLACKLISTED_KEEPERS)?
            .unwrap_or_default())
    }

    pub fn max_keeper_retries(&self) -> Result<u64> {
        self.state
            .get_strict(keys::MAX_KEEPER_RETRIES)?
            .as_u64()
            .ok_or_else(|| invalid(keys::MAX_KEEPER_RETRIES, "expected an integer"))
    }

    /// Raw agreed order, if one is in flight
    pub fn order_value(&self) -> Option<&'a Value> {
        self.state.get(keys::ORDER).filter(|v| !v.is_null())
    }

    pub fn order(&self) -> Result<Option<ReadyOrder>> {
        self.state.get_as(keys::ORDER)
    }

    /// UID reported by the keeper, or the error sentinel
    pub fn order_uid(&self) -> Result<Option<String>> {
        self.state.get_as(keys::ORDER_UID)
    }

    pub fn verified_order(&self) -> Result<Option<ReadyOrder>> {
        self.state.get_as(keys::VERIFIED_ORDER)
    }

    pub fn verified_orders(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .state
            .get_as::<BTreeSet<String>>(keys::VERIFIED_ORDERS)?
            .unwrap_or_default())
    }

    pub fn abandoned_orders(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .state
            .get_as::<BTreeSet<String>>(keys::ABANDONED_ORDERS)?
            .unwrap_or_default())
    }

    /// Orders that no longer need work: verified or given up on
    pub fn settled_order_uids(&self) -> Result<BTreeSet<String>> {
        let mut settled = self.verified_orders()?;
        settled.extend(self.abandoned_orders()?);
        Ok(settled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cow_orders::rounds::setup_state;
    use serde_json::json;

    fn agents() -> Vec<Address> {
        (1..=4).map(Address::from_low_u64_be).collect()
    }

    #[test]
    fn test_defaults_on_fresh_state() {
        let state = setup_state(agents(), 3);
        let data = SynchronizedData::new(&state);

        assert_eq!(data.keepers().unwrap(), KeeperQueue::default());
        assert!(data.blacklisted_keepers().unwrap().is_empty());
        assert!(data.settled_order_uids().unwrap().is_empty());
        assert_eq!(data.max_keeper_retries().unwrap(), 3);
        assert!(data.order().unwrap().is_none());
        assert!(matches!(
            data.most_voted_randomness(),
            Err(WatchtowerError::MissingKey(_))
        ));
    }

    #[test]
    fn test_typed_accessors() {
        let queue = KeeperQueue::new(2, vec![Address::from_low_u64_be(3)]);
        let state = setup_state(agents(), 3).update([
            (keys::KEEPERS, json!(queue.to_hex())),
            (keys::MOST_VOTED_RANDOMNESS, json!(format!("{:?}", H256::repeat_byte(7)))),
            (keys::MOST_VOTED_RANDOMNESS_ROUND, json!(12)),
            (keys::VERIFIED_ORDERS, json!(["0xaa"])),
            (keys::ABANDONED_ORDERS, json!(["0xbb"])),
        ]);
        let data = SynchronizedData::new(&state);

        assert_eq!(data.keepers().unwrap(), queue);
        assert_eq!(data.keeper_in_priority().unwrap(), Some(Address::from_low_u64_be(3)));
        assert_eq!(data.most_voted_randomness().unwrap(), H256::repeat_byte(7));
        assert_eq!(data.most_voted_randomness_round().unwrap(), 12);
        assert_eq!(data.settled_order_uids().unwrap().len(), 2);
    }

    #[test]
    fn test_order_reference_prefers_uid() {
        assert_eq!(order_reference(&json!({"orderUid": "0xABCD"})), "0xabcd");

        let a = order_reference(&json!({"x": 1, "y": 2}));
        let b = order_reference(&json!({"y": 2, "x": 1}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 66);
    }
}
