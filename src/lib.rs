pub mod adapters;
pub mod agent;
pub mod cli;
pub mod config;
pub mod consensus;
pub mod cow_orders;
pub mod domain;
pub mod eip712;
pub mod error;
pub mod exchange;

pub use agent::{AgentParams, KeccakBeacon, LocalNetwork, RandomnessBeacon, WatchtowerAgent};
pub use config::AppConfig;
pub use consensus::{AbciApp, AbciAppSpec, Block, Event, Payload, ReplicatedState, RoundTicket};
pub use cow_orders::{CowRound, KeeperQueue, SynchronizedData};
pub use domain::OrderRegistry;
pub use eip712::{Eip712Domain, Order, OrderUid, ReadyOrder};
pub use error::{Result, WatchtowerError};
pub use exchange::{OrderBook, OrderBookKind};
