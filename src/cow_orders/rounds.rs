//! Order lifecycle rounds
//!
//! ```text
//! SelectOrders    --DONE-->            Randomness
//! SelectOrders    --NO_ACTION-->       FinishedWithOrders
//! Randomness      --DONE-->            SelectKeeper
//! SelectKeeper    --DONE-->            PlaceOrders
//! SelectKeeper    --NO_MAJORITY-->     Randomness
//! PlaceOrders     --DONE-->            VerifyExecution
//! PlaceOrders     --ROUND_TIMEOUT-->   Randomness
//! PlaceOrders     --NO_ACTION-->       SelectOrders
//! VerifyExecution --DONE-->            SelectOrders
//! VerifyExecution --BAD_SUBMISSION-->  Randomness
//! VerifyExecution --NO_MAJORITY-->     PlaceOrders
//! ```
//!
//! Every other non-terminal round loops on ROUND_TIMEOUT (and NO_MAJORITY,
//! unless listed above) as encoded in [`cow_app_spec`]. A silent keeper is
//! charged like a failed submission: it is blacklisted and a new keeper is
//! drawn, until the retry budget is spent and the order is abandoned
//! (NO_ACTION).

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

use super::keeper::KeeperQueue;
use super::synchronized::{keys, order_reference, SynchronizedData};
use crate::consensus::{
    AbciAppSpec, DegenerateRound, Event, KeeperOnlyRound, ReplicatedState, Round,
    ThresholdCollectionRound,
};
use crate::error::{Result, WatchtowerError};

pub const NO_ORDERS_PAYLOAD: &str = "no_orders_payload";
pub const ERROR_PAYLOAD: &str = "error";
pub const VERIFICATION_OK: &str = "verification_ok";
pub const VERIFICATION_FAILED: &str = "verification_failed";

/// Default maximum round duration
pub const ROUND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CowRound {
    SelectOrders,
    Randomness,
    SelectKeeper,
    PlaceOrders,
    VerifyExecution,
    FinishedWithOrders,
}

impl CowRound {
    pub const ALL: [CowRound; 6] = [
        CowRound::SelectOrders,
        CowRound::Randomness,
        CowRound::SelectKeeper,
        CowRound::PlaceOrders,
        CowRound::VerifyExecution,
        CowRound::FinishedWithOrders,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CowRound::SelectOrders => "select_orders",
            CowRound::Randomness => "randomness",
            CowRound::SelectKeeper => "select_keeper",
            CowRound::PlaceOrders => "place_orders",
            CowRound::VerifyExecution => "verify_execution",
            CowRound::FinishedWithOrders => "finished_with_orders",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CowRound::FinishedWithOrders)
    }
}

impl fmt::Display for CowRound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for CowRound {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        CowRound::ALL
            .into_iter()
            .find(|round| round.as_str() == s)
            .ok_or_else(|| format!("Unknown round: {}", s))
    }
}

/// Genesis state: participants and the keeper retry budget.
pub fn setup_state(
    participants: impl IntoIterator<Item = Address>,
    max_keeper_retries: u64,
) -> ReplicatedState {
    ReplicatedState::new(participants).update([
        (keys::MAX_KEEPER_RETRIES, json!(max_keeper_retries)),
        (keys::KEEPERS, json!(KeeperQueue::default().to_hex())),
    ])
}

fn select_orders_outcome(state: &ReplicatedState, content: &Value) -> Result<(ReplicatedState, Event)> {
    if content == NO_ORDERS_PAYLOAD {
        return Ok((state.clone(), Event::NoAction));
    }

    info!(order = %order_reference(content), "order selected");
    // A new order starts with a fresh retry counter
    Ok((
        state.update([
            (keys::ORDER, content.clone()),
            (keys::KEEPERS, json!(KeeperQueue::default().to_hex())),
        ]),
        Event::Done,
    ))
}

fn verify_execution_outcome(
    state: &ReplicatedState,
    content: &Value,
) -> Result<(ReplicatedState, Event)> {
    let data = SynchronizedData::new(state);
    let reference = data
        .order_value()
        .map(order_reference)
        .ok_or_else(|| WatchtowerError::MissingKey(keys::ORDER.to_string()))?;

    if content == VERIFICATION_OK {
        let mut verified = data.verified_orders()?;
        verified.insert(reference.clone());
        info!(order = %reference, "order verified");
        return Ok((
            state.update([
                (keys::VERIFIED_ORDER, state.get_or(keys::ORDER, Value::Null)),
                (keys::VERIFIED_ORDERS, json!(verified)),
            ]),
            Event::Done,
        ));
    }

    match charge_keeper(state, &data, &reference)? {
        KeeperCharge::Retry(next) => Ok((next, Event::BadSubmission)),
        KeeperCharge::Abandoned(next) => Ok((next, Event::Done)),
    }
}

enum KeeperCharge {
    /// Keeper blacklisted, another one gets drawn
    Retry(ReplicatedState),
    /// Retry budget spent, order given up
    Abandoned(ReplicatedState),
}

fn charge_keeper(
    state: &ReplicatedState,
    data: &SynchronizedData<'_>,
    reference: &str,
) -> Result<KeeperCharge> {
    let queue = data.keepers()?;
    if queue.retries >= data.max_keeper_retries()? {
        let mut abandoned = data.abandoned_orders()?;
        abandoned.insert(reference.to_string());
        warn!(order = %reference, retries = queue.retries, "keeper retries exhausted, abandoning order");
        return Ok(KeeperCharge::Abandoned(
            state.update([(keys::ABANDONED_ORDERS, json!(abandoned))]),
        ));
    }

    let mut blacklist: BTreeSet<Address> = data.blacklisted_keepers()?;
    if let Some(keeper) = queue.head() {
        warn!(order = %reference, keeper = ?keeper, retries = queue.retries, "blacklisting keeper");
        blacklist.insert(keeper);
    }
    Ok(KeeperCharge::Retry(
        state.update([(keys::BLACKLISTED_KEEPERS, json!(blacklist))]),
    ))
}

/// Timeouts of the keeper round count against the keeper retry budget.
/// Other rounds time out with their state untouched.
pub fn timeout_outcome(
    id: CowRound,
    state: &ReplicatedState,
    event: Event,
) -> Result<(ReplicatedState, Event)> {
    if id != CowRound::PlaceOrders {
        return Ok((state.clone(), event));
    }

    let data = SynchronizedData::new(state);
    let reference = data
        .order_value()
        .map(order_reference)
        .ok_or_else(|| WatchtowerError::MissingKey(keys::ORDER.to_string()))?;
    warn!(order = %reference, "keeper did not respond in time");

    match charge_keeper(state, &data, &reference)? {
        KeeperCharge::Retry(next) => Ok((next, Event::RoundTimeout)),
        KeeperCharge::Abandoned(next) => Ok((next, Event::NoAction)),
    }
}

/// Instantiate the round for `id`.
pub fn build_round(id: CowRound, state: &ReplicatedState) -> Result<Round> {
    let name = id.as_str();
    let round: Round = match id {
        CowRound::SelectOrders => ThresholdCollectionRound::new(name, state.clone(), &[keys::ORDER])
            .with_handler(select_orders_outcome)
            .into(),
        CowRound::Randomness => ThresholdCollectionRound::new(
            name,
            state.clone(),
            &[keys::MOST_VOTED_RANDOMNESS_ROUND, keys::MOST_VOTED_RANDOMNESS],
        )
        .into(),
        CowRound::SelectKeeper => {
            ThresholdCollectionRound::new(name, state.clone(), &[keys::KEEPERS]).into()
        }
        CowRound::PlaceOrders => {
            let keeper = SynchronizedData::new(state)
                .keeper_in_priority()?
                .ok_or_else(|| WatchtowerError::MissingKey(keys::KEEPERS.to_string()))?;
            KeeperOnlyRound::new(name, state.clone(), keeper, keys::ORDER_UID).into()
        }
        CowRound::VerifyExecution => ThresholdCollectionRound::new(name, state.clone(), &[])
            .with_handler(verify_execution_outcome)
            .into(),
        CowRound::FinishedWithOrders => DegenerateRound::new(name, state.clone()).into(),
    };
    Ok(round)
}

/// Transition table of the order lifecycle.
pub fn cow_app_spec(round_timeout: Duration) -> AbciAppSpec<CowRound> {
    use CowRound::*;
    use Event::*;

    let transitions = BTreeMap::from([
        (
            SelectOrders,
            BTreeMap::from([
                (Done, Randomness),
                (NoMajority, SelectOrders),
                (RoundTimeout, SelectOrders),
                (NoAction, FinishedWithOrders),
            ]),
        ),
        (
            Randomness,
            BTreeMap::from([
                (Done, SelectKeeper),
                (NoMajority, Randomness),
                (RoundTimeout, Randomness),
            ]),
        ),
        (
            SelectKeeper,
            BTreeMap::from([
                (Done, PlaceOrders),
                (NoMajority, Randomness),
                (RoundTimeout, SelectKeeper),
            ]),
        ),
        (
            PlaceOrders,
            BTreeMap::from([
                (Done, VerifyExecution),
                (RoundTimeout, Randomness),
                (NoAction, SelectOrders),
            ]),
        ),
        (
            VerifyExecution,
            BTreeMap::from([
                (Done, SelectOrders),
                (BadSubmission, Randomness),
                (NoMajority, PlaceOrders),
                (RoundTimeout, PlaceOrders),
            ]),
        ),
        (FinishedWithOrders, BTreeMap::new()),
    ]);

    AbciAppSpec {
        initial_round: SelectOrders,
        final_rounds: BTreeSet::from([FinishedWithOrders]),
        transitions,
        event_to_timeout: BTreeMap::from([(RoundTimeout, round_timeout)]),
        build_round,
        on_timeout: Some(timeout_outcome),
    }
}
