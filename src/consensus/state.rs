use ethers::types::Address;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::{Result, WatchtowerError};

/// Byzantine-safe quorum for `n` participants: strictly more than two thirds.
pub fn consensus_threshold(n: usize) -> usize {
    2 * n / 3 + 1
}

#[derive(Debug, PartialEq)]
struct StateData {
    participants: BTreeSet<Address>,
    period: u64,
    values: BTreeMap<String, Vec<Value>>,
}

/// Append-only key/value store shared by every round of one agent.
///
/// Each key maps to its value history, one entry per decision that wrote it.
/// `update` never mutates: it returns a new snapshot and leaves the old one
/// reachable for anyone still holding it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicatedState {
    inner: Arc<StateData>,
}

impl ReplicatedState {
    pub fn new(participants: impl IntoIterator<Item = Address>) -> Self {
        Self {
            inner: Arc::new(StateData {
                participants: participants.into_iter().collect(),
                period: 0,
                values: BTreeMap::new(),
            }),
        }
    }

    pub fn participants(&self) -> &BTreeSet<Address> {
        &self.inner.participants
    }

    pub fn nb_participants(&self) -> usize {
        self.inner.participants.len()
    }

    pub fn is_participant(&self, address: &Address) -> bool {
        self.inner.participants.contains(address)
    }

    pub fn quorum(&self) -> usize {
        consensus_threshold(self.nb_participants())
    }

    pub fn period(&self) -> u64 {
        self.inner.period
    }

    /// Latest value of `key`
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.inner.values.get(key).and_then(|history| history.last())
    }

    pub fn get_strict(&self, key: &str) -> Result<&Value> {
        self.get(key)
            .ok_or_else(|| WatchtowerError::MissingKey(key.to_string()))
    }

    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).cloned().unwrap_or(default)
    }

    /// Latest value of `key` decoded into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| WatchtowerError::InvalidStateValue {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    pub fn history(&self, key: &str) -> &[Value] {
        self.inner
            .values
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.inner.values.keys().map(String::as_str)
    }

    pub fn update<K, I>(&self, entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut values = self.inner.values.clone();
        for (key, value) in entries {
            values.entry(key.into()).or_default().push(value);
        }
        Self {
            inner: Arc::new(StateData {
                participants: self.inner.participants.clone(),
                period: self.inner.period,
                values,
            }),
        }
    }

    /// Same contents, period counter incremented.
    pub fn next_period(&self) -> Self {
        Self {
            inner: Arc::new(StateData {
                participants: self.inner.participants.clone(),
                period: self.inner.period + 1,
                values: self.inner.values.clone(),
            }),
        }
    }

    /// True when both handles point at the same snapshot.
    pub fn same_snapshot(&self, other: &ReplicatedState) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
