//! Transition-table driven round engine.
//!
//! The engine owns the active round, feeds it the payloads of each delivered
//! block and moves along the transition table once the round decides. Round
//! timeouts are measured on block timestamps so that every agent fires them
//! at the same height.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::{Debug, Display};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::payload::{Event, Payload};
use super::round::{Decision, Round};
use super::state::ReplicatedState;
use crate::error::{Result, RoundError, WatchtowerError};

/// Identifier of a round in a transition table
pub trait RoundId: Copy + Ord + Debug + Display + Send + Sync + 'static {}

impl<T> RoundId for T where T: Copy + Ord + Debug + Display + Send + Sync + 'static {}

/// Instantiates the round for `id` against the state it starts from.
pub type RoundBuilder<R> = fn(R, &ReplicatedState) -> Result<Round>;

/// Rewrites the state and event of a timed out round before the edge is
/// taken. Without one, a timeout keeps the state as it was.
pub type TimeoutHandler<R> = fn(R, &ReplicatedState, Event) -> Result<(ReplicatedState, Event)>;

/// Static description of an application: rounds, transitions, timeouts.
#[derive(Clone)]
pub struct AbciAppSpec<R: RoundId> {
    pub initial_round: R,
    pub final_rounds: BTreeSet<R>,
    pub transitions: BTreeMap<R, BTreeMap<Event, R>>,
    pub event_to_timeout: BTreeMap<Event, Duration>,
    pub build_round: RoundBuilder<R>,
    pub on_timeout: Option<TimeoutHandler<R>>,
}

impl<R: RoundId> AbciAppSpec<R> {
    /// Check that the table is closed and terminal rounds are terminal.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if !self.transitions.contains_key(&self.initial_round) {
            problems.push(format!("initial round {} has no table entry", self.initial_round));
        }
        for (from, edges) in &self.transitions {
            for (event, to) in edges {
                if !self.transitions.contains_key(to) {
                    problems.push(format!("{} --{}--> {} leads to an unknown round", from, event, to));
                }
            }
        }
        for round in &self.final_rounds {
            match self.transitions.get(round) {
                None => problems.push(format!("final round {} has no table entry", round)),
                Some(edges) if !edges.is_empty() => {
                    problems.push(format!("final round {} has outgoing transitions", round))
                }
                Some(_) => {}
            }
        }
        for (event, timeout) in &self.event_to_timeout {
            if timeout.is_zero() {
                problems.push(format!("timeout for {} must be positive", event));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(WatchtowerError::InvalidTransitionTable(problems.join("; ")))
        }
    }

    pub fn next_round(&self, from: R, event: Event) -> Option<R> {
        self.transitions.get(&from).and_then(|edges| edges.get(&event)).copied()
    }
}

/// Block as delivered by the replication layer
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub height: u64,
    pub timestamp: DateTime<Utc>,
    pub payloads: Vec<Payload>,
}

/// Identifies one round instance. A response produced under an older ticket
/// belongs to a round that no longer exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoundTicket {
    pub period: u64,
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition<R> {
    pub from: R,
    pub event: Event,
    pub to: R,
    pub period: u64,
    pub sequence: u64,
}

/// Completed round, kept in the bounded history
#[derive(Debug, Clone)]
pub struct RoundRecord<R> {
    pub round: R,
    pub event: Event,
    pub period: u64,
    pub sequence: u64,
    pub state: ReplicatedState,
}

pub struct AbciApp<R: RoundId> {
    spec: AbciAppSpec<R>,
    current_id: R,
    current: Round,
    state: ReplicatedState,
    sequence: u64,
    entered_at: Option<DateTime<Utc>>,
    last_timestamp: Option<DateTime<Utc>>,
    history: VecDeque<RoundRecord<R>>,
    max_history: usize,
}

impl<R: RoundId> AbciApp<R> {
    pub fn new(spec: AbciAppSpec<R>, state: ReplicatedState, max_history: usize) -> Result<Self> {
        spec.validate()?;
        let current_id = spec.initial_round;
        let current = (spec.build_round)(current_id, &state)?;

        Ok(Self {
            spec,
            current_id,
            current,
            state,
            sequence: 0,
            entered_at: None,
            last_timestamp: None,
            history: VecDeque::new(),
            max_history,
        })
    }

    pub fn current_round(&self) -> R {
        self.current_id
    }

    pub fn round(&self) -> &Round {
        &self.current
    }

    pub fn state(&self) -> &ReplicatedState {
        &self.state
    }

    pub fn period(&self) -> u64 {
        self.state.period()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn ticket(&self) -> RoundTicket {
        RoundTicket {
            period: self.state.period(),
            sequence: self.sequence,
        }
    }

    pub fn history(&self) -> impl Iterator<Item = &RoundRecord<R>> {
        self.history.iter()
    }

    pub fn is_finished(&self) -> bool {
        self.spec.final_rounds.contains(&self.current_id)
    }

    pub fn spec(&self) -> &AbciAppSpec<R> {
        &self.spec
    }

    /// Feed a payload to the active round outside of block processing.
    pub fn submit(&mut self, payload: Payload) -> std::result::Result<(), RoundError> {
        self.current.submit(payload)
    }

    /// Deadline of the active round, once its start time is known.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        let entered_at = self.entered_at?;
        let timeout = self
            .spec
            .event_to_timeout
            .iter()
            .filter(|(event, _)| self.spec.next_round(self.current_id, **event).is_some())
            .map(|(_, timeout)| *timeout)
            .min()?;
        let timeout = chrono::Duration::from_std(timeout).ok()?;
        Some(entered_at + timeout)
    }

    fn timed_out_event(&self, now: DateTime<Utc>) -> Option<Event> {
        let entered_at = self.entered_at?;
        let elapsed = (now - entered_at).to_std().ok()?;
        self.spec
            .event_to_timeout
            .iter()
            .filter(|(event, _)| self.spec.next_round(self.current_id, **event).is_some())
            .filter(|(_, timeout)| elapsed >= **timeout)
            .min_by_key(|(_, timeout)| **timeout)
            .map(|(event, _)| *event)
    }

    /// Run one block through the active round: timeout check, payload
    /// submission, decision. Returns the transition taken, if any.
    pub fn process_block(&mut self, block: &Block) -> Result<Option<Transition<R>>> {
        self.last_timestamp = Some(block.timestamp);
        if self.entered_at.is_none() {
            self.entered_at = Some(block.timestamp);
        }
        if self.current.is_degenerate() {
            return Ok(None);
        }

        if let Some(event) = self.timed_out_event(block.timestamp) {
            warn!(
                round = %self.current_id,
                height = block.height,
                "round timed out, dropping {} payload(s)",
                block.payloads.len()
            );
            let (state, event) = match self.spec.on_timeout {
                Some(handler) => handler(self.current_id, &self.state, event)?,
                None => (self.state.clone(), event),
            };
            return self.advance_with(state, event).map(Some);
        }

        for payload in &block.payloads {
            if let Err(e) = self.current.submit(payload.clone()) {
                warn!(round = %self.current_id, height = block.height, "payload rejected: {}", e);
            }
        }

        match self.current.decide()? {
            Decision::NotDecided => Ok(None),
            Decision::Decided(state, event) => self.advance_with(state, event).map(Some),
        }
    }

    /// Take the `event` edge keeping the current state.
    pub fn advance(&mut self, event: Event) -> Result<Transition<R>> {
        let state = self.state.clone();
        self.advance_with(state, event)
    }

    /// Take the `event` edge with the state produced by the decision.
    pub fn advance_with(&mut self, state: ReplicatedState, event: Event) -> Result<Transition<R>> {
        let from = self.current_id;
        let to = self
            .spec
            .next_round(from, event)
            .ok_or_else(|| WatchtowerError::UnreachableTransition {
                round: from.to_string(),
                event: event.to_string(),
            })?;

        let next = (self.spec.build_round)(to, &state)?;

        self.history.push_back(RoundRecord {
            round: from,
            event,
            period: state.period(),
            sequence: self.sequence,
            state: state.clone(),
        });
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }

        let transition = Transition {
            from,
            event,
            to,
            period: state.period(),
            sequence: self.sequence,
        };

        self.state = state;
        self.current = next;
        self.current_id = to;
        self.sequence += 1;
        self.entered_at = self.last_timestamp;

        info!(
            period = transition.period,
            sequence = transition.sequence,
            "{} --{}--> {}",
            from,
            event,
            to
        );
        Ok(transition)
    }

    /// Start the next period from the initial round. The replicated state
    /// is kept, only its period counter moves.
    pub fn reset_period(&mut self) -> Result<()> {
        let state = self.state.next_period();
        let current = (self.spec.build_round)(self.spec.initial_round, &state)?;

        debug!(period = state.period(), "starting new period");
        self.state = state;
        self.current = current;
        self.current_id = self.spec.initial_round;
        self.sequence += 1;
        self.entered_at = self.last_timestamp;
        Ok(())
    }
}
