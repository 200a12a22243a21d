//! In-process order book for dry runs and simulations.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::info;

use crate::eip712::{Eip712Domain, ReadyOrder};
use crate::error::{Result, WatchtowerError};
use crate::exchange::{OrderBook, OrderBookKind};

/// How submissions are answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmissionMode {
    #[default]
    Accept,
    /// Refuse every order, as a non-2xx API response would
    Reject,
    /// Store nothing and answer with a UID that does not match the order
    Misreport,
}

pub struct InMemoryOrderBook {
    domain: Eip712Domain,
    orders: RwLock<BTreeMap<String, ReadyOrder>>,
    mode: RwLock<SubmissionMode>,
}

impl InMemoryOrderBook {
    pub fn new(domain: Eip712Domain) -> Self {
        Self {
            domain,
            orders: RwLock::new(BTreeMap::new()),
            mode: RwLock::new(SubmissionMode::Accept),
        }
    }

    pub fn with_mode(domain: Eip712Domain, mode: SubmissionMode) -> Self {
        Self {
            mode: RwLock::new(mode),
            ..Self::new(domain)
        }
    }

    pub async fn set_mode(&self, mode: SubmissionMode) {
        *self.mode.write().await = mode;
    }

    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.orders.read().await.is_empty()
    }

    pub async fn submitted_uids(&self) -> Vec<String> {
        self.orders.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl OrderBook for InMemoryOrderBook {
    fn kind(&self) -> OrderBookKind {
        OrderBookKind::InMemory
    }

    async fn submit_order(&self, order: &ReadyOrder) -> Result<String> {
        let mode = *self.mode.read().await;
        let uid = order.recompute_uid(&self.domain)?;

        match mode {
            SubmissionMode::Reject => Err(WatchtowerError::OrderBook(format!(
                "order {} rejected",
                uid
            ))),
            SubmissionMode::Misreport => {
                let mut bogus = uid;
                bogus.0[0] ^= 0xff;
                Ok(bogus.to_string())
            }
            SubmissionMode::Accept => {
                let uid = uid.to_string();
                info!(uid = %uid, "[DRY RUN] order accepted");
                self.orders.write().await.insert(uid.clone(), order.clone());
                Ok(uid)
            }
        }
    }

    async fn order_exists(&self, uid: &str) -> Result<bool> {
        Ok(self.orders.read().await.contains_key(&uid.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eip712::GPV2_SETTLEMENT;
    use serde_json::json;

    fn domain() -> Eip712Domain {
        Eip712Domain::gpv2(31337, GPV2_SETTLEMENT.parse().unwrap())
    }

    fn ready_order() -> ReadyOrder {
        let raw = json!({
            "sellToken": "0x0000000000000000000000000000000000000001",
            "buyToken": "0x0000000000000000000000000000000000000002",
            "receiver": null,
            "sellAmount": "10",
            "buyAmount": "1",
            "validTo": 1686755136,
            "appData": "0x320530c667bc337342614750b6b7ab2430bdd290c9fff11cdfebd685072ab171",
            "feeAmount": "0",
            "kind": "sell",
            "partiallyFillable": false,
            "sellTokenBalance": "erc20",
            "buyTokenBalance": "erc20",
            "from": "0xcD84cF5E892E77d65c396c50DD77A534Ea20b896",
        });
        ReadyOrder::from_tradeable(&raw, &domain()).unwrap()
    }

    #[tokio::test]
    async fn test_accepted_orders_are_found_by_uid() {
        let book = InMemoryOrderBook::new(domain());
        let order = ready_order();

        let uid = book.submit_order(&order).await.unwrap();
        assert_eq!(uid, order.order_uid.to_string());
        assert!(book.order_exists(&uid).await.unwrap());
        assert!(book.order_exists(&uid.to_uppercase().replace("0X", "0x")).await.unwrap());
        assert_eq!(book.len().await, 1);
    }

    #[tokio::test]
    async fn test_rejecting_book_returns_error() {
        let book = InMemoryOrderBook::with_mode(domain(), SubmissionMode::Reject);
        assert!(book.submit_order(&ready_order()).await.is_err());
        assert!(book.is_empty().await);
    }

    #[tokio::test]
    async fn test_misreporting_book_returns_wrong_uid() {
        let book = InMemoryOrderBook::new(domain());
        book.set_mode(SubmissionMode::Misreport).await;

        let order = ready_order();
        let uid = book.submit_order(&order).await.unwrap();
        assert_ne!(uid, order.order_uid.to_string());
        assert!(!book.order_exists(&uid).await.unwrap());
    }
}
