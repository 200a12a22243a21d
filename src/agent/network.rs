//! In-process replication layer: collects the agents' payloads, orders
//! them into blocks and delivers every block to every agent.

use chrono::{DateTime, Duration, Utc};
use ethers::types::Address;
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use super::watchtower::{TicketedPayload, WatchtowerAgent};
use crate::consensus::{Block, Payload, RoundTicket, Transition};
use crate::cow_orders::CowRound;
use crate::error::{Result, WatchtowerError};

/// What one block did
#[derive(Debug, Clone)]
pub struct StepReport {
    pub height: u64,
    pub delivered: usize,
    pub discarded: usize,
    pub transition: Option<Transition<CowRound>>,
}

pub struct LocalNetwork {
    agents: Vec<WatchtowerAgent>,
    height: u64,
    now: DateTime<Utc>,
    block_interval: Duration,
    rng: StdRng,
    muted: BTreeSet<Address>,
    pending: Vec<TicketedPayload>,
}

impl LocalNetwork {
    pub fn new(
        agents: Vec<WatchtowerAgent>,
        genesis: DateTime<Utc>,
        block_interval: Duration,
        seed: u64,
    ) -> Result<Self> {
        if agents.is_empty() {
            return Err(WatchtowerError::InvalidConfig("network needs at least one agent".to_string()));
        }
        Ok(Self {
            agents,
            height: 0,
            now: genesis,
            block_interval,
            rng: StdRng::seed_from_u64(seed),
            muted: BTreeSet::new(),
            pending: Vec::new(),
        })
    }

    pub fn agents(&self) -> &[WatchtowerAgent] {
        &self.agents
    }

    pub fn agents_mut(&mut self) -> &mut [WatchtowerAgent] {
        &mut self.agents
    }

    pub fn agent(&self, address: Address) -> Option<&WatchtowerAgent> {
        self.agents.iter().find(|agent| agent.address() == address)
    }

    /// Any agent's view; they are checked to agree after every block.
    pub fn leader(&self) -> &WatchtowerAgent {
        &self.agents[0]
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn current_ticket(&self) -> RoundTicket {
        self.leader().ticket()
    }

    /// Stop delivering the agent's payloads. It still receives blocks.
    pub fn mute(&mut self, address: Address) {
        self.muted.insert(address);
    }

    pub fn unmute(&mut self, address: Address) {
        self.muted.remove(&address);
    }

    /// Let wall-clock time pass without producing a block.
    pub fn advance_time(&mut self, by: Duration) {
        self.now += by;
    }

    /// Queue a payload for the next block, as a late response would arrive.
    pub fn inject(&mut self, payload: TicketedPayload) {
        self.pending.push(payload);
    }

    /// Let every unmuted agent act, then produce and deliver one block.
    pub async fn step(&mut self) -> Result<StepReport> {
        let muted = &self.muted;
        let results = join_all(
            self.agents
                .iter_mut()
                .filter(|agent| !muted.contains(&agent.address()))
                .map(|agent| agent.act()),
        )
        .await;

        for result in results {
            match result {
                Ok(Some(payload)) => self.pending.push(payload),
                Ok(None) => {}
                Err(e) => warn!("agent failed to produce a payload: {}", e),
            }
        }

        let current = self.current_ticket();
        let (fresh, stale): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|p| p.ticket == current);
        if !stale.is_empty() {
            debug!(discarded = stale.len(), "discarding payloads of closed rounds");
        }

        let mut payloads: Vec<Payload> = fresh.into_iter().map(|p| p.payload).collect();
        payloads.shuffle(&mut self.rng);

        self.height += 1;
        self.now += self.block_interval;
        let block = Block {
            height: self.height,
            timestamp: self.now,
            payloads,
        };

        let mut transitions = Vec::with_capacity(self.agents.len());
        for agent in &mut self.agents {
            transitions.push(agent.process_block(&block)?);
        }
        self.check_agreement()?;

        Ok(StepReport {
            height: self.height,
            delivered: block.payloads.len(),
            discarded: stale.len(),
            transition: transitions.into_iter().next().flatten(),
        })
    }

    /// Step until every agent reached a terminal round. Returns the height.
    pub async fn run_until_finished(&mut self, max_blocks: u64) -> Result<u64> {
        let start = self.height;
        while !self.agents.iter().all(WatchtowerAgent::is_finished) {
            if self.height - start >= max_blocks {
                return Err(WatchtowerError::Internal(format!(
                    "agents did not finish within {} blocks (stuck in {})",
                    max_blocks,
                    self.leader().current_round()
                )));
            }
            self.step().await?;
        }
        Ok(self.height)
    }

    /// Move every agent on to the next period.
    pub fn start_next_period(&mut self) -> Result<()> {
        for agent in &mut self.agents {
            agent.start_next_period()?;
        }
        Ok(())
    }

    fn check_agreement(&self) -> Result<()> {
        let leader = self.leader();
        for agent in &self.agents[1..] {
            if agent.ticket() != leader.ticket() || agent.current_round() != leader.current_round() {
                return Err(WatchtowerError::Internal(format!(
                    "agent {:?} diverged at height {}: {} vs {}",
                    agent.address(),
                    self.height,
                    agent.current_round(),
                    leader.current_round()
                )));
            }
        }
        Ok(())
    }
}
