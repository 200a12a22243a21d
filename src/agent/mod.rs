//! Watchtower agents and the in-process network that drives them

pub mod beacon;
pub mod network;
pub mod watchtower;

pub use beacon::{KeccakBeacon, RandomnessBeacon};
pub use network::{LocalNetwork, StepReport};
pub use watchtower::{AgentParams, TicketedPayload, WatchtowerAgent};
