//! One watchtower agent: its view of the replicated FSM plus the local,
//! non-replicated collaborators its behaviours talk to.

use ethers::types::Address;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::beacon::RandomnessBeacon;
use crate::config::AppConfig;
use crate::consensus::{AbciApp, Block, Event, Payload, RoundTicket, Transition};
use crate::cow_orders::behaviours::{
    is_keeper, place_orders_content, randomness_content, select_keeper_content,
    select_orders_content, verify_execution_content,
};
use crate::cow_orders::{cow_app_spec, setup_state, CowRound, SynchronizedData, ROUND_TIMEOUT};
use crate::domain::{ChainUpdate, OrderRegistry, TWAP_HANDLER};
use crate::eip712::Eip712Domain;
use crate::error::{Result, WatchtowerError};
use crate::exchange::OrderBook;

#[derive(Debug, Clone, Copy)]
pub struct AgentParams {
    pub round_timeout: Duration,
    pub max_history: usize,
    pub max_keeper_retries: u64,
}

impl Default for AgentParams {
    fn default() -> Self {
        Self {
            round_timeout: ROUND_TIMEOUT,
            max_history: 64,
            max_keeper_retries: 3,
        }
    }
}

impl AgentParams {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            round_timeout: config.round_timeout(),
            max_history: config.consensus.max_history,
            max_keeper_retries: config.keeper.max_retries,
        }
    }
}

/// Payload tagged with the round instance it was produced for
#[derive(Debug, Clone, PartialEq)]
pub struct TicketedPayload {
    pub ticket: RoundTicket,
    pub payload: Payload,
}

pub struct WatchtowerAgent {
    address: Address,
    app: AbciApp<CowRound>,
    registry: OrderRegistry,
    order_book: Arc<dyn OrderBook>,
    beacon: Arc<dyn RandomnessBeacon>,
    domain: Eip712Domain,
    twap_handler: Address,
    acted: Option<RoundTicket>,
}

impl WatchtowerAgent {
    pub fn new(
        address: Address,
        participants: Vec<Address>,
        params: AgentParams,
        order_book: Arc<dyn OrderBook>,
        beacon: Arc<dyn RandomnessBeacon>,
        domain: Eip712Domain,
    ) -> Result<Self> {
        if !participants.contains(&address) {
            return Err(WatchtowerError::InvalidConfig(format!(
                "agent {:?} is not a participant",
                address
            )));
        }

        let state = setup_state(participants, params.max_keeper_retries);
        let app = AbciApp::new(cow_app_spec(params.round_timeout), state, params.max_history)?;
        Ok(Self {
            address,
            app,
            registry: OrderRegistry::new(),
            order_book,
            beacon,
            domain,
            twap_handler: TWAP_HANDLER,
            acted: None,
        })
    }

    /// Use another TWAP handler deployment for expiry checks.
    pub fn with_twap_handler(mut self, twap_handler: Address) -> Self {
        self.twap_handler = twap_handler;
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn app(&self) -> &AbciApp<CowRound> {
        &self.app
    }

    pub fn current_round(&self) -> CowRound {
        self.app.current_round()
    }

    pub fn ticket(&self) -> RoundTicket {
        self.app.ticket()
    }

    pub fn synchronized(&self) -> SynchronizedData<'_> {
        SynchronizedData::new(self.app.state())
    }

    pub fn registry(&self) -> &OrderRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut OrderRegistry {
        &mut self.registry
    }

    pub fn is_finished(&self) -> bool {
        self.app.is_finished()
    }

    /// Feed what the chain reported in a new block into the local backlog.
    pub fn apply_chain_update(&mut self, update: ChainUpdate) -> usize {
        let ready = self
            .registry
            .apply_chain_update(update, self.twap_handler, &self.domain);
        if ready > 0 {
            debug!(agent = ?self.address, ready, "orders became tradeable");
        }
        ready
    }

    /// Whether a payload produced under `ticket` still belongs to the
    /// active round.
    pub fn is_current(&self, ticket: RoundTicket) -> bool {
        self.app.ticket() == ticket
    }

    /// Produce this agent's payload for the active round, at most once per
    /// round instance. Returns `None` when the agent has nothing to send.
    pub async fn act(&mut self) -> Result<Option<TicketedPayload>> {
        let ticket = self.app.ticket();
        if self.acted == Some(ticket) || self.app.is_finished() {
            return Ok(None);
        }

        let round = self.app.current_round();
        let state = self.app.state().clone();
        let data = SynchronizedData::new(&state);

        let content = match round {
            CowRound::SelectOrders => select_orders_content(self.registry.ready_orders(), &data)?,
            CowRound::Randomness => {
                let beacon_round = self.app.sequence();
                let randomness = self.beacon.randomness(beacon_round).await?;
                randomness_content(beacon_round, randomness)
            }
            CowRound::SelectKeeper => select_keeper_content(&data)?,
            CowRound::PlaceOrders => {
                if !is_keeper(&data, self.address)? {
                    self.acted = Some(ticket);
                    return Ok(None);
                }
                place_orders_content(self.order_book.as_ref(), &data).await
            }
            CowRound::VerifyExecution => {
                verify_execution_content(self.order_book.as_ref(), &data, &self.domain).await
            }
            CowRound::FinishedWithOrders => return Ok(None),
        };

        debug!(agent = ?self.address, round = %round, sequence = ticket.sequence, "payload ready");
        self.acted = Some(ticket);
        Ok(Some(TicketedPayload {
            ticket,
            payload: Payload::new(self.address, content),
        }))
    }

    /// Apply a delivered block. Settled orders leave the local backlog once
    /// the order was verified or abandoned.
    pub fn process_block(&mut self, block: &Block) -> Result<Option<Transition<CowRound>>> {
        let transition = self.app.process_block(block)?;

        if let Some(t) = &transition {
            let settled = matches!(
                (t.from, t.event),
                (CowRound::VerifyExecution, Event::Done) | (CowRound::PlaceOrders, Event::NoAction)
            );
            if settled {
                let settled = self.synchronized().settled_order_uids()?;
                let removed = self.registry.remove_settled(&settled);
                if removed > 0 {
                    debug!(agent = ?self.address, removed, "pruned settled orders from backlog");
                }
            }
        }
        Ok(transition)
    }

    /// Loop back to the first round after the backlog ran dry.
    pub fn start_next_period(&mut self) -> Result<()> {
        self.app.reset_period()?;
        self.acted = None;
        info!(agent = ?self.address, period = self.app.period(), "period started");
        Ok(())
    }
}
