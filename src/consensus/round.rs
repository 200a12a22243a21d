//! Round primitives.
//!
//! A round collects payloads for one step of the protocol and decides once
//! enough of them agree. The set of round kinds is closed; domain rounds pick
//! one of them and plug in their own threshold handler.

use ethers::types::Address;
use serde_json::Value;
use std::collections::BTreeMap;

use super::payload::{Event, Payload};
use super::state::ReplicatedState;
use crate::error::{Result, RoundError, WatchtowerError};

/// Maps the agreed content to the next state and event.
pub type ThresholdHandler = fn(&ReplicatedState, &Value) -> Result<(ReplicatedState, Event)>;

/// Outcome of `decide`
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    NotDecided,
    Decided(ReplicatedState, Event),
}

impl Decision {
    pub fn event(&self) -> Option<Event> {
        match self {
            Decision::NotDecided => None,
            Decision::Decided(_, event) => Some(*event),
        }
    }
}

/// Write `content` under `keys`. With several keys the content must be an
/// array of the same length, element `i` going to key `i`.
pub fn store_selection(
    state: &ReplicatedState,
    keys: &[String],
    content: &Value,
) -> Result<ReplicatedState> {
    match keys {
        [] => Ok(state.clone()),
        [key] => Ok(state.update([(key.clone(), content.clone())])),
        _ => {
            let items = content
                .as_array()
                .filter(|items| items.len() == keys.len())
                .ok_or_else(|| WatchtowerError::InvalidStateValue {
                    key: keys.join(","),
                    reason: format!("expected an array of {} values", keys.len()),
                })?;
            Ok(state.update(keys.iter().cloned().zip(items.iter().cloned())))
        }
    }
}

/// Collects one payload per participant and decides on a quorum.
#[derive(Debug, Clone)]
pub struct ThresholdCollectionRound {
    name: &'static str,
    state: ReplicatedState,
    collection: BTreeMap<Address, Payload>,
    selection_keys: Vec<String>,
    on_threshold: Option<ThresholdHandler>,
}

impl ThresholdCollectionRound {
    pub fn new(name: &'static str, state: ReplicatedState, selection_keys: &[&str]) -> Self {
        Self {
            name,
            state,
            collection: BTreeMap::new(),
            selection_keys: selection_keys.iter().map(|k| k.to_string()).collect(),
            on_threshold: None,
        }
    }

    /// Replace the default "store under selection keys, emit DONE" behaviour.
    pub fn with_handler(mut self, handler: ThresholdHandler) -> Self {
        self.on_threshold = Some(handler);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> &ReplicatedState {
        &self.state
    }

    pub fn collection(&self) -> &BTreeMap<Address, Payload> {
        &self.collection
    }

    pub fn submit(&mut self, payload: Payload) -> std::result::Result<(), RoundError> {
        if !self.state.is_participant(&payload.sender) {
            return Err(RoundError::UnknownSender {
                round: self.name.to_string(),
                sender: format!("{:?}", payload.sender),
            });
        }
        if self.collection.contains_key(&payload.sender) {
            return Err(RoundError::DuplicateSender {
                round: self.name.to_string(),
                sender: format!("{:?}", payload.sender),
            });
        }
        self.collection.insert(payload.sender, payload);
        Ok(())
    }

    /// Most common content and its count. Ties go to the smallest canonical
    /// encoding so every agent picks the same value.
    pub fn most_voted(&self) -> Option<(Value, usize)> {
        let mut counts: BTreeMap<String, (usize, &Value)> = BTreeMap::new();
        for payload in self.collection.values() {
            counts
                .entry(payload.canonical())
                .or_insert((0, &payload.content))
                .0 += 1;
        }

        let mut best: Option<(usize, &Value)> = None;
        for (count, value) in counts.into_values() {
            if best.map_or(true, |(best_count, _)| count > best_count) {
                best = Some((count, value));
            }
        }
        best.map(|(count, value)| (value.clone(), count))
    }

    pub fn threshold_reached(&self) -> bool {
        self.most_voted()
            .map_or(false, |(_, count)| count >= self.state.quorum())
    }

    /// Whether the participants that have not voted yet could still push some
    /// value over the quorum.
    pub fn is_majority_possible(&self) -> bool {
        let max_count = self.most_voted().map_or(0, |(_, count)| count);
        let outstanding = self.state.nb_participants() - self.collection.len();
        max_count + outstanding >= self.state.quorum()
    }

    pub fn decide(&self) -> Result<Decision> {
        if let Some((content, count)) = self.most_voted() {
            if count >= self.state.quorum() {
                let (state, event) = match self.on_threshold {
                    Some(handler) => handler(&self.state, &content)?,
                    None => (
                        store_selection(&self.state, &self.selection_keys, &content)?,
                        Event::Done,
                    ),
                };
                return Ok(Decision::Decided(state, event));
            }
        }
        if !self.is_majority_possible() {
            return Ok(Decision::Decided(self.state.clone(), Event::NoMajority));
        }
        Ok(Decision::NotDecided)
    }
}

/// Accepts a single payload from the designated keeper.
#[derive(Debug, Clone)]
pub struct KeeperOnlyRound {
    name: &'static str,
    state: ReplicatedState,
    keeper: Address,
    payload: Option<Payload>,
    selection_key: String,
    on_payload: Option<ThresholdHandler>,
}

impl KeeperOnlyRound {
    pub fn new(
        name: &'static str,
        state: ReplicatedState,
        keeper: Address,
        selection_key: &str,
    ) -> Self {
        Self {
            name,
            state,
            keeper,
            payload: None,
            selection_key: selection_key.to_string(),
            on_payload: None,
        }
    }

    pub fn with_handler(mut self, handler: ThresholdHandler) -> Self {
        self.on_payload = Some(handler);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn keeper(&self) -> Address {
        self.keeper
    }

    pub fn state(&self) -> &ReplicatedState {
        &self.state
    }

    pub fn submit(&mut self, payload: Payload) -> std::result::Result<(), RoundError> {
        let sender = format!("{:?}", payload.sender);
        if !self.state.is_participant(&payload.sender) {
            return Err(RoundError::UnknownSender {
                round: self.name.to_string(),
                sender,
            });
        }
        if payload.sender != self.keeper {
            return Err(RoundError::NotKeeper {
                round: self.name.to_string(),
                sender,
            });
        }
        if self.payload.is_some() {
            return Err(RoundError::DuplicateSender {
                round: self.name.to_string(),
                sender,
            });
        }
        self.payload = Some(payload);
        Ok(())
    }

    /// DONE as soon as the keeper has spoken, whatever it said.
    pub fn decide(&self) -> Result<Decision> {
        let Some(payload) = &self.payload else {
            return Ok(Decision::NotDecided);
        };
        let (state, event) = match self.on_payload {
            Some(handler) => handler(&self.state, &payload.content)?,
            None => (
                self.state
                    .update([(self.selection_key.clone(), payload.content.clone())]),
                Event::Done,
            ),
        };
        Ok(Decision::Decided(state, event))
    }
}

/// Terminal round. Accepts nothing and never decides.
#[derive(Debug, Clone)]
pub struct DegenerateRound {
    name: &'static str,
    state: ReplicatedState,
}

impl DegenerateRound {
    pub fn new(name: &'static str, state: ReplicatedState) -> Self {
        Self { name, state }
    }
}

/// Closed set of round kinds
#[derive(Debug, Clone)]
pub enum Round {
    Collection(ThresholdCollectionRound),
    KeeperOnly(KeeperOnlyRound),
    Degenerate(DegenerateRound),
}

impl Round {
    pub fn name(&self) -> &'static str {
        match self {
            Round::Collection(r) => r.name,
            Round::KeeperOnly(r) => r.name,
            Round::Degenerate(r) => r.name,
        }
    }

    /// Snapshot the round started from
    pub fn state(&self) -> &ReplicatedState {
        match self {
            Round::Collection(r) => &r.state,
            Round::KeeperOnly(r) => &r.state,
            Round::Degenerate(r) => &r.state,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        matches!(self, Round::Degenerate(_))
    }

    pub fn submit(&mut self, payload: Payload) -> std::result::Result<(), RoundError> {
        match self {
            Round::Collection(r) => r.submit(payload),
            Round::KeeperOnly(r) => r.submit(payload),
            Round::Degenerate(r) => Err(RoundError::RoundClosed(r.name.to_string())),
        }
    }

    pub fn decide(&self) -> Result<Decision> {
        match self {
            Round::Collection(r) => r.decide(),
            Round::KeeperOnly(r) => r.decide(),
            Round::Degenerate(_) => Ok(Decision::NotDecided),
        }
    }
}

impl From<ThresholdCollectionRound> for Round {
    fn from(round: ThresholdCollectionRound) -> Self {
        Round::Collection(round)
    }
}

impl From<KeeperOnlyRound> for Round {
    fn from(round: KeeperOnlyRound) -> Self {
        Round::KeeperOnly(round)
    }
}

impl From<DegenerateRound> for Round {
    fn from(round: DegenerateRound) -> Self {
        Round::Degenerate(round)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn agents(n: u64) -> Vec<Address> {
        (1..=n).map(Address::from_low_u64_be).collect()
    }

    fn collection_round(n: u64) -> ThresholdCollectionRound {
        ThresholdCollectionRound::new("test_round", ReplicatedState::new(agents(n)), &["value"])
    }

    #[test]
    fn test_three_of_four_identical_payloads_decide() {
        let mut round = collection_round(4);
        let agents = agents(4);

        round.submit(Payload::new(agents[0], json!({"a": 1, "b": 2}))).unwrap();
        round.submit(Payload::new(agents[1], json!({"b": 2, "a": 1}))).unwrap();
        assert_eq!(round.decide().unwrap(), Decision::NotDecided);

        round.submit(Payload::new(agents[2], json!({"a": 1, "b": 2}))).unwrap();
        match round.decide().unwrap() {
            Decision::Decided(state, event) => {
                assert_eq!(event, Event::Done);
                assert_eq!(state.get("value"), Some(&json!({"a": 1, "b": 2})));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_two_two_split_is_no_majority() {
        let mut round = collection_round(4);
        let agents = agents(4);

        round.submit(Payload::new(agents[0], json!("x"))).unwrap();
        round.submit(Payload::new(agents[1], json!("x"))).unwrap();
        round.submit(Payload::new(agents[2], json!("y"))).unwrap();
        assert!(round.is_majority_possible());
        assert_eq!(round.decide().unwrap(), Decision::NotDecided);

        round.submit(Payload::new(agents[3], json!("y"))).unwrap();
        assert!(!round.is_majority_possible());
        match round.decide().unwrap() {
            Decision::Decided(state, event) => {
                assert_eq!(event, Event::NoMajority);
                assert!(state.same_snapshot(round.state()));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_and_unknown_senders_rejected() {
        let mut round = collection_round(4);
        let agents = agents(4);

        round.submit(Payload::new(agents[0], json!(1))).unwrap();
        assert!(matches!(
            round.submit(Payload::new(agents[0], json!(2))),
            Err(RoundError::DuplicateSender { .. })
        ));
        assert!(matches!(
            round.submit(Payload::new(Address::from_low_u64_be(99), json!(1))),
            Err(RoundError::UnknownSender { .. })
        ));
        assert_eq!(round.collection().len(), 1);
    }

    #[test]
    fn test_custom_handler_replaces_default_update() {
        fn handler(state: &ReplicatedState, content: &Value) -> Result<(ReplicatedState, Event)> {
            if content == "nothing" {
                Ok((state.clone(), Event::NoAction))
            } else {
                Ok((state.update([("value", content.clone())]), Event::Done))
            }
        }

        let mut round = ThresholdCollectionRound::new(
            "test_round",
            ReplicatedState::new(agents(1)),
            &["value"],
        )
        .with_handler(handler);
        round
            .submit(Payload::new(Address::from_low_u64_be(1), json!("nothing")))
            .unwrap();
        assert_eq!(round.decide().unwrap().event(), Some(Event::NoAction));
    }

    #[test]
    fn test_multiple_selection_keys_split_array_content() {
        let state = ReplicatedState::new(agents(1));
        let keys = vec!["round".to_string(), "randomness".to_string()];

        let next = store_selection(&state, &keys, &json!([7, "0xabc"])).unwrap();
        assert_eq!(next.get("round"), Some(&json!(7)));
        assert_eq!(next.get("randomness"), Some(&json!("0xabc")));

        assert!(store_selection(&state, &keys, &json!("0xabc")).is_err());
    }

    #[test]
    fn test_keeper_only_round_rejects_other_senders() {
        let agents = agents(4);
        let mut round = KeeperOnlyRound::new(
            "keeper_round",
            ReplicatedState::new(agents.clone()),
            agents[2],
            "result",
        );

        assert!(matches!(
            round.submit(Payload::new(agents[0], json!("0x01"))),
            Err(RoundError::NotKeeper { .. })
        ));
        assert_eq!(round.decide().unwrap(), Decision::NotDecided);

        // An error sentinel from the keeper still completes the round
        round.submit(Payload::new(agents[2], json!("error"))).unwrap();
        match round.decide().unwrap() {
            Decision::Decided(state, event) => {
                assert_eq!(event, Event::Done);
                assert_eq!(state.get("result"), Some(&json!("error")));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(
            round.submit(Payload::new(agents[2], json!("again"))),
            Err(RoundError::DuplicateSender { .. })
        ));
    }

    #[test]
    fn test_degenerate_round_is_closed() {
        let mut round: Round =
            DegenerateRound::new("finished", ReplicatedState::new(agents(4))).into();
        assert!(round.is_degenerate());
        assert_eq!(
            round.submit(Payload::new(Address::from_low_u64_be(1), json!(1))),
            Err(RoundError::RoundClosed("finished".to_string()))
        );
        assert_eq!(round.decide().unwrap(), Decision::NotDecided);
    }
}
