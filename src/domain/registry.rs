//! Agent-local conditional order registry and ready-order backlog.
//!
//! Nothing here is replicated. Agents may disagree about their backlogs;
//! the select-orders round settles which order is worked on.

use ethers::types::{Address, Bytes, H256};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::conditional::{ConditionalOrder, ConditionalOrderParams, Proof, TwapData};
use crate::eip712::{Eip712Domain, ReadyOrder};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalOrderCreated {
    pub owner: Address,
    pub params: ConditionalOrderParams,
    #[serde(default)]
    pub proof: Option<Proof>,
    pub composable_cow: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenOrder {
    pub path: Vec<H256>,
    pub params: ConditionalOrderParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleRootSet {
    pub owner: Address,
    pub merkle_root: H256,
    pub orders: Vec<ProvenOrder>,
    pub composable_cow: Address,
}

/// Events decoded from one transaction receipt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBatch {
    #[serde(default)]
    pub conditional_orders_created: Vec<ConditionalOrderCreated>,
    #[serde(default)]
    pub merkle_root_set: Vec<MerkleRootSet>,
}

/// Order returned by the contract as tradeable now, tagged with the local id
/// of the conditional order it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeableOrder {
    pub id: String,
    pub order: Value,
}

/// Everything an agent learns from one new block
#[derive(Debug, Clone, Default)]
pub struct ChainUpdate {
    pub block_timestamp: u64,
    pub events: EventBatch,
    pub tradeable: Vec<TradeableOrder>,
    /// TWAP start times recorded on chain, keyed by params hash
    pub cabinet: BTreeMap<H256, u64>,
}

#[derive(Debug, Default)]
pub struct OrderRegistry {
    orders: BTreeMap<Address, Vec<ConditionalOrder>>,
    ready_orders: Vec<ReadyOrder>,
}

impl OrderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a conditional order unless the owner already has one with the
    /// same params. Returns the local id of the stored order.
    pub fn add_conditional_order(
        &mut self,
        owner: Address,
        params: ConditionalOrderParams,
        proof: Option<Proof>,
        composable_cow: Address,
    ) -> String {
        let owner_orders = self.orders.entry(owner).or_default();
        let key = params.hash();
        if let Some(existing) = owner_orders.iter().find(|o| o.params.hash() == key) {
            debug!(owner = ?owner, id = %existing.id, "conditional order already registered");
            return existing.id.clone();
        }

        let id = Uuid::new_v4().simple().to_string();
        info!(owner = ?owner, id = %id, hash = ?key, handler = ?params.handler, "conditional order registered");
        owner_orders.push(ConditionalOrder {
            id: id.clone(),
            owner,
            params,
            proof,
            offchain_input: Bytes::default(),
            composable_cow,
        });
        id
    }

    /// A new merkle root replaces the owner's previous one: orders proven
    /// against any other root are dropped. Orders without a proof stay.
    pub fn flush_stale_roots(&mut self, owner: Address, root: H256) -> usize {
        let Some(owner_orders) = self.orders.get_mut(&owner) else {
            return 0;
        };
        let before = owner_orders.len();
        owner_orders.retain(|o| o.proof.as_ref().map_or(true, |p| p.merkle_root == root));
        before - owner_orders.len()
    }

    pub fn ingest_events(&mut self, batch: EventBatch) {
        for created in batch.conditional_orders_created {
            self.add_conditional_order(
                created.owner,
                created.params,
                created.proof,
                created.composable_cow,
            );
        }

        for root_set in batch.merkle_root_set {
            let flushed = self.flush_stale_roots(root_set.owner, root_set.merkle_root);
            if flushed > 0 {
                info!(owner = ?root_set.owner, flushed, "flushed orders of a replaced merkle root");
            }
            for proven in root_set.orders {
                self.add_conditional_order(
                    root_set.owner,
                    proven.params,
                    Some(Proof {
                        merkle_root: root_set.merkle_root,
                        path: proven.path,
                    }),
                    root_set.composable_cow,
                );
            }
        }
    }

    /// Move tradeable orders into the backlog and forget dropped ones.
    /// Orders that fail to encode are skipped. Returns how many were added.
    pub fn ingest_tradeable(
        &mut self,
        tradeable: &[TradeableOrder],
        drop: &[String],
        domain: &Eip712Domain,
    ) -> usize {
        let mut added = 0;
        for entry in tradeable {
            let ready = match ReadyOrder::from_tradeable(&entry.order, domain) {
                Ok(ready) => ready,
                Err(e) => {
                    warn!(id = %entry.id, "skipping tradeable order: {}", e);
                    continue;
                }
            };

            self.remove_conditional_order(&entry.id);
            if self.ready_orders.iter().any(|o| o.order_uid == ready.order_uid) {
                continue;
            }
            debug!(uid = %ready.order_uid, "order ready");
            self.ready_orders.push(ready);
            added += 1;
        }

        for id in drop {
            if self.remove_conditional_order(id) {
                info!(id = %id, "dropped expired conditional order");
            }
        }
        added
    }

    /// Local ids of TWAP orders handled by `twap_handler` whose last part
    /// ended before `block_timestamp`. Orders with undecodable input are kept.
    pub fn expired_twap_orders(
        &self,
        twap_handler: Address,
        block_timestamp: u64,
        cabinet: &BTreeMap<H256, u64>,
    ) -> Vec<String> {
        self.all_conditional_orders()
            .filter(|o| o.params.handler == twap_handler)
            .filter_map(|o| match TwapData::decode(&o.params.static_input) {
                Ok(twap) => {
                    let started = cabinet.get(&o.params.hash()).copied().unwrap_or_default();
                    twap.should_drop(block_timestamp, started).then(|| o.id.clone())
                }
                Err(e) => {
                    warn!(id = %o.id, "cannot decode TWAP input: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Register the block's events, then move its tradeable orders into the
    /// backlog while dropping expired TWAPs. Returns how many orders became
    /// ready.
    pub fn apply_chain_update(
        &mut self,
        update: ChainUpdate,
        twap_handler: Address,
        domain: &Eip712Domain,
    ) -> usize {
        self.ingest_events(update.events);
        let expired = self.expired_twap_orders(twap_handler, update.block_timestamp, &update.cabinet);
        self.ingest_tradeable(&update.tradeable, &expired, domain)
    }

    pub fn remove_conditional_order(&mut self, id: &str) -> bool {
        let mut removed = false;
        for owner_orders in self.orders.values_mut() {
            let before = owner_orders.len();
            owner_orders.retain(|o| o.id != id);
            removed |= owner_orders.len() != before;
        }
        self.orders.retain(|_, v| !v.is_empty());
        removed
    }

    pub fn conditional_orders(&self, owner: &Address) -> &[ConditionalOrder] {
        self.orders.get(owner).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn all_conditional_orders(&self) -> impl Iterator<Item = &ConditionalOrder> {
        self.orders.values().flatten()
    }

    pub fn conditional_order_count(&self) -> usize {
        self.orders.values().map(Vec::len).sum()
    }

    pub fn ready_orders(&self) -> &[ReadyOrder] {
        &self.ready_orders
    }

    pub fn push_ready(&mut self, order: ReadyOrder) {
        if !self.ready_orders.iter().any(|o| o.order_uid == order.order_uid) {
            self.ready_orders.push(order);
        }
    }

    /// Drop backlog entries whose UID is in `settled`.
    pub fn remove_settled(&mut self, settled: &BTreeSet<String>) -> usize {
        let before = self.ready_orders.len();
        self.ready_orders
            .retain(|o| !settled.contains(&o.order_uid.to_string()));
        before - self.ready_orders.len()
    }
}
