use anyhow::{anyhow, Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use ethers::types::{Address, Bytes, H256, U256};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::agent::{AgentParams, KeccakBeacon, LocalNetwork, WatchtowerAgent};
use crate::config::AppConfig;
use crate::domain::{
    ChainUpdate, ConditionalOrderCreated, ConditionalOrderParams, EventBatch, TradeableOrder, TwapData,
};
use crate::eip712::{extract_order_uid_params, Eip712Domain, Order, GPV2_SETTLEMENT};
use crate::exchange::build_order_book;

#[derive(Parser)]
#[command(name = "watchtower")]
#[command(version = "0.1.0")]
#[command(about = "Decentralized watchtower for conditional CoW orders", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config directory
    #[arg(short, long, default_value = "config", global = true)]
    pub config: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compute the UID of an order
    Uid {
        /// JSON file holding the order message
        order: PathBuf,
        /// Order owner
        #[arg(long)]
        owner: String,
        /// Chain id of the EIP-712 domain
        #[arg(long, default_value = "1")]
        chain_id: u64,
        /// Verifying contract of the EIP-712 domain
        #[arg(long, default_value = GPV2_SETTLEMENT)]
        settlement: String,
    },
    /// Split a UID into digest, owner and expiry
    DecodeUid {
        uid: String,
    },
    /// Run the configured participants in-process against a dry-run order book
    Simulate {
        /// Number of TWAP orders fed to every agent
        #[arg(long, default_value = "3")]
        orders: u64,
        /// Seed for the beacon and block ordering
        #[arg(long, default_value = "0")]
        seed: u64,
    },
}

fn parse_owner(raw: &str) -> Result<Address> {
    raw.parse::<Address>()
        .map_err(|e| anyhow!("invalid address {}: {}", raw, e))
}

pub fn compute_uid(path: &PathBuf, owner: &str, chain_id: u64, settlement: &str) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let message: Value = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    let domain = Eip712Domain::gpv2(chain_id, parse_owner(settlement)?);

    let order = Order::from_message(&message).context("invalid order message")?;
    let uid = order.uid(&domain, parse_owner(owner)?)?;
    println!("{}", uid);
    Ok(())
}

pub fn decode_uid(uid: &str) -> Result<()> {
    let bytes = hex::decode(uid.trim().trim_start_matches("0x")).context("UID is not hex")?;
    let params = extract_order_uid_params(&bytes)?;

    println!("digest:   0x{}", hex::encode(params.order_digest));
    println!("owner:    {:?}", params.owner);
    println!("valid to: {}", params.valid_to);
    if let Some(at) = Utc.timestamp_opt(i64::from(params.valid_to), 0).single() {
        println!("          {}", at.to_rfc3339());
    }
    Ok(())
}

const DEMO_OWNER: u64 = 0xc0ffee;

/// TWAP `i` of a fixed demo owner: four hourly parts starting when created.
fn demo_twap(i: u64) -> TwapData {
    TwapData {
        sell_token: Address::from_low_u64_be(0x5e11),
        buy_token: Address::from_low_u64_be(0xb0b),
        receiver: Address::zero(),
        part_sell_amount: U256::from((i + 1) * 1_000),
        min_part_limit: U256::from((i + 1) * 990),
        t0: U256::zero(),
        n: U256::from(4u64),
        t: U256::from(3_600u64),
        span: U256::zero(),
        app_data: H256::zero(),
    }
}

/// Register `n_orders` TWAPs with the agent and poll their current parts,
/// the way a chain watcher reports one block.
fn seed_agent(agent: &mut WatchtowerAgent, twap_handler: Address, n_orders: u64, now: u64) -> usize {
    let owner = Address::from_low_u64_be(DEMO_OWNER);
    let created: Vec<ConditionalOrderCreated> = (0..n_orders)
        .map(|i| ConditionalOrderCreated {
            owner,
            params: ConditionalOrderParams {
                handler: twap_handler,
                salt: H256::from_low_u64_be(i),
                static_input: Bytes::from(demo_twap(i).encode()),
            },
            proof: None,
            composable_cow: Address::zero(),
        })
        .collect();
    let cabinet: BTreeMap<H256, u64> = created.iter().map(|c| (c.params.hash(), now)).collect();

    agent.apply_chain_update(ChainUpdate {
        block_timestamp: now,
        events: EventBatch {
            conditional_orders_created: created,
            merkle_root_set: vec![],
        },
        tradeable: vec![],
        cabinet: cabinet.clone(),
    });

    let tradeable: Vec<TradeableOrder> = agent
        .registry()
        .all_conditional_orders()
        .filter_map(|o| {
            let twap = TwapData::decode(&o.params.static_input).ok()?;
            let started = cabinet.get(&o.params.hash()).copied().unwrap_or(now);
            Some(TradeableOrder {
                id: o.id.clone(),
                order: twap.part_order(o.owner, started, now)?,
            })
        })
        .collect();

    agent.apply_chain_update(ChainUpdate {
        block_timestamp: now,
        events: EventBatch::default(),
        tradeable,
        cabinet,
    })
}

pub async fn simulate(config: &AppConfig, n_orders: u64, seed: u64) -> Result<()> {
    let domain = config.domain()?;
    let params = AgentParams::from_config(config);
    let participants = config.participant_addresses()?;
    let own = config.own_address()?;
    let twap_handler = config.twap_handler()?;
    let book = build_order_book(config, true)?;
    let beacon = Arc::new(KeccakBeacon::from_u64(seed));

    let genesis = Utc::now();
    let now = u64::try_from(genesis.timestamp()).context("clock is before the epoch")?;

    let mut agents = Vec::with_capacity(participants.len());
    for address in &participants {
        let mut agent = WatchtowerAgent::new(
            *address,
            participants.clone(),
            params,
            book.clone(),
            beacon.clone(),
            domain.clone(),
        )?
        .with_twap_handler(twap_handler);
        let ready = seed_agent(&mut agent, twap_handler, n_orders, now);
        info!(agent = ?address, ready, "backlog seeded");
        agents.push(agent);
    }

    let mut network = LocalNetwork::new(agents, genesis, chrono::Duration::seconds(1), seed)?;
    let max_blocks = 64 * (n_orders + 1) * (params.max_keeper_retries + 1);
    let height = network.run_until_finished(max_blocks).await?;
    info!(height, "all agents finished");

    let agent = network
        .agent(own)
        .ok_or_else(|| anyhow!("agent.address {:?} is not running", own))?;
    let data = agent.synchronized();
    let verified = data.verified_orders()?;
    let abandoned = data.abandoned_orders()?;

    println!("agent:     {:?}", own);
    println!("blocks:    {}", height);
    println!("verified:  {}", verified.len());
    for uid in &verified {
        println!("  {}", uid);
    }
    println!("abandoned: {}", abandoned.len());
    for uid in &abandoned {
        println!("  {}", uid);
    }
    println!("order book: {}", book.kind());
    Ok(())
}
