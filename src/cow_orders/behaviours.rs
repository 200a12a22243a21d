//! Payload producers, one per round.
//!
//! External failures never escape as errors from the place/verify
//! behaviours; they become sentinel payloads so the round still decides.

use ethers::types::{Address, H256};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::keeper::{select_keeper, KeeperQueue};
use super::rounds::{ERROR_PAYLOAD, NO_ORDERS_PAYLOAD, VERIFICATION_FAILED, VERIFICATION_OK};
use super::synchronized::SynchronizedData;
use crate::eip712::{Eip712Domain, ReadyOrder};
use crate::error::{Result, WatchtowerError};
use crate::exchange::OrderBook;

/// Propose the unsettled ready order with the lowest UID, or the no-orders
/// sentinel.
pub fn select_orders_content(backlog: &[ReadyOrder], data: &SynchronizedData<'_>) -> Result<Value> {
    let settled = data.settled_order_uids()?;
    let candidate = backlog
        .iter()
        .filter(|order| !settled.contains(&order.order_uid.to_string()))
        .min_by_key(|order| order.order_uid);

    match candidate {
        Some(order) => {
            debug!(uid = %order.order_uid, "proposing order");
            Ok(serde_json::to_value(order)?)
        }
        None => Ok(Value::from(NO_ORDERS_PAYLOAD)),
    }
}

/// `[round, randomness]`
pub fn randomness_content(round: u64, randomness: H256) -> Value {
    json!([round, format!("{:?}", randomness)])
}

/// One-keeper queue chosen from the agreed randomness.
pub fn select_keeper_content(data: &SynchronizedData<'_>) -> Result<Value> {
    let randomness = data.most_voted_randomness()?;
    let previous = data.keepers()?;
    let blacklist = data.blacklisted_keepers()?;

    let keeper = select_keeper(data.participants(), &blacklist, &randomness)
        .ok_or_else(|| WatchtowerError::Internal("no participants to select a keeper from".to_string()))?;
    let queue = KeeperQueue::new(previous.retries + 1, vec![keeper]);
    debug!(keeper = ?keeper, retries = queue.retries, "proposing keeper");
    Ok(Value::from(queue.to_hex()))
}

/// Whether `address` is expected to act in the place-orders round.
pub fn is_keeper(data: &SynchronizedData<'_>, address: Address) -> Result<bool> {
    Ok(data.keeper_in_priority()? == Some(address))
}

/// Submit the agreed order and report its UID, or the error sentinel.
pub async fn place_orders_content(order_book: &dyn OrderBook, data: &SynchronizedData<'_>) -> Value {
    let order = match data.order() {
        Ok(Some(order)) => order,
        Ok(None) => {
            warn!("no agreed order to place");
            return Value::from(ERROR_PAYLOAD);
        }
        Err(e) => {
            warn!("agreed order is not a valid ready order: {}", e);
            return Value::from(ERROR_PAYLOAD);
        }
    };

    match order_book.submit_order(&order).await {
        Ok(uid) => {
            debug!(uid = %uid, "order submitted");
            Value::from(uid)
        }
        Err(e) => {
            warn!(uid = %order.order_uid, "order submission failed: {}", e);
            Value::from(ERROR_PAYLOAD)
        }
    }
}

async fn check_submission(
    order_book: &dyn OrderBook,
    data: &SynchronizedData<'_>,
    domain: &Eip712Domain,
) -> Result<bool> {
    let reported = data.order_uid()?.unwrap_or_else(|| ERROR_PAYLOAD.to_string());
    if reported == ERROR_PAYLOAD {
        return Ok(false);
    }

    let order = data
        .order()?
        .ok_or_else(|| WatchtowerError::MissingKey("order".to_string()))?;
    let expected = order.recompute_uid(domain)?.to_string();
    if !reported.eq_ignore_ascii_case(&expected) {
        warn!(reported = %reported, expected = %expected, "keeper reported an unexpected UID");
        return Ok(false);
    }

    order_book.order_exists(&expected).await
}

/// Re-derive the UID, compare with the keeper's report and look it up.
pub async fn verify_execution_content(
    order_book: &dyn OrderBook,
    data: &SynchronizedData<'_>,
    domain: &Eip712Domain,
) -> Value {
    match check_submission(order_book, data, domain).await {
        Ok(true) => Value::from(VERIFICATION_OK),
        Ok(false) => Value::from(VERIFICATION_FAILED),
        Err(e) => {
            warn!("verification failed: {}", e);
            Value::from(VERIFICATION_FAILED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cow_orders::rounds::setup_state;
    use crate::cow_orders::synchronized::keys;
    use crate::eip712::GPV2_SETTLEMENT;
    use crate::exchange::MockOrderBook;
    use crate::consensus::ReplicatedState;

    fn agents() -> Vec<Address> {
        (1..=4).map(Address::from_low_u64_be).collect()
    }

    fn domain() -> Eip712Domain {
        Eip712Domain::gpv2(31337, GPV2_SETTLEMENT.parse().unwrap())
    }

    fn ready_order(sell_amount: u64) -> ReadyOrder {
        let raw = json!({
            "sellToken": "0x0000000000000000000000000000000000000001",
            "buyToken": "0x0000000000000000000000000000000000000002",
            "receiver": null,
            "sellAmount": sell_amount,
            "buyAmount": 1,
            "validTo": 1686755136,
            "appData": "0x320530c667bc337342614750b6b7ab2430bdd290c9fff11cdfebd685072ab171",
            "feeAmount": 0,
            "kind": "sell",
            "partiallyFillable": false,
            "from": "0xcD84cF5E892E77d65c396c50DD77A534Ea20b896",
        });
        ReadyOrder::from_tradeable(&raw, &domain()).unwrap()
    }

    fn placed_state(order: &ReadyOrder, reported_uid: &str) -> ReplicatedState {
        setup_state(agents(), 3).update([
            (keys::ORDER, serde_json::to_value(order).unwrap()),
            (keys::ORDER_UID, json!(reported_uid)),
        ])
    }

    #[test]
    fn test_select_orders_picks_lowest_unsettled_uid() {
        let orders = vec![ready_order(10), ready_order(11), ready_order(12)];
        let lowest = orders.iter().map(|o| o.order_uid).min().unwrap();

        let state = setup_state(agents(), 3);
        let content = select_orders_content(&orders, &SynchronizedData::new(&state)).unwrap();
        assert_eq!(content["orderUid"], json!(lowest.to_string()));

        let settled = state.update([(keys::VERIFIED_ORDERS, json!([lowest.to_string()]))]);
        let content = select_orders_content(&orders, &SynchronizedData::new(&settled)).unwrap();
        assert_ne!(content["orderUid"], json!(lowest.to_string()));

        let content = select_orders_content(&[], &SynchronizedData::new(&state)).unwrap();
        assert_eq!(content, json!(NO_ORDERS_PAYLOAD));
    }

    #[test]
    fn test_select_keeper_increments_retries() {
        let state = setup_state(agents(), 3).update([
            (keys::MOST_VOTED_RANDOMNESS, json!(format!("{:?}", H256::zero()))),
            (keys::KEEPERS, json!(KeeperQueue::new(1, vec![agents()[3]]).to_hex())),
        ]);
        let content = select_keeper_content(&SynchronizedData::new(&state)).unwrap();
        let queue = KeeperQueue::from_hex(content.as_str().unwrap()).unwrap();
        assert_eq!(queue.retries, 2);
        assert_eq!(queue.head(), Some(agents()[0]));
    }

    #[tokio::test]
    async fn test_place_orders_maps_api_failure_to_sentinel() {
        let order = ready_order(10);
        let state = placed_state(&order, "");

        let mut book = MockOrderBook::new();
        book.expect_submit_order()
            .returning(|_| Err(WatchtowerError::OrderBook("status=500".to_string())));
        let content = place_orders_content(&book, &SynchronizedData::new(&state)).await;
        assert_eq!(content, json!(ERROR_PAYLOAD));

        let mut book = MockOrderBook::new();
        book.expect_submit_order()
            .returning(|order| Ok(order.order_uid.to_string()));
        let content = place_orders_content(&book, &SynchronizedData::new(&state)).await;
        assert_eq!(content, json!(order.order_uid.to_string()));
    }

    #[tokio::test]
    async fn test_verify_execution_checks_uid_and_order_book() {
        let order = ready_order(10);
        let uid = order.order_uid.to_string();

        let mut book = MockOrderBook::new();
        book.expect_order_exists().returning(|_| Ok(true));
        let state = placed_state(&order, &uid);
        let content = verify_execution_content(&book, &SynchronizedData::new(&state), &domain()).await;
        assert_eq!(content, json!(VERIFICATION_OK));

        // Wrong UID never reaches the order book
        let mut book = MockOrderBook::new();
        book.expect_order_exists().never();
        let state = placed_state(&order, &ready_order(11).order_uid.to_string());
        let content = verify_execution_content(&book, &SynchronizedData::new(&state), &domain()).await;
        assert_eq!(content, json!(VERIFICATION_FAILED));

        let state = placed_state(&order, ERROR_PAYLOAD);
        let content = verify_execution_content(&book, &SynchronizedData::new(&state), &domain()).await;
        assert_eq!(content, json!(VERIFICATION_FAILED));
    }

    #[tokio::test]
    async fn test_verify_execution_treats_lookup_errors_as_failure() {
        let order = ready_order(10);
        let mut book = MockOrderBook::new();
        book.expect_order_exists()
            .returning(|_| Err(WatchtowerError::OrderBook("timeout".to_string())));
        let state = placed_state(&order, &order.order_uid.to_string());
        let content = verify_execution_content(&book, &SynchronizedData::new(&state), &domain()).await;
        assert_eq!(content, json!(VERIFICATION_FAILED));
    }
}
