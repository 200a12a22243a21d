pub mod app;
pub mod payload;
pub mod round;
pub mod state;

pub use app::{
    AbciApp, AbciAppSpec, Block, RoundBuilder, RoundId, RoundRecord, RoundTicket, TimeoutHandler,
    Transition,
};
pub use payload::{Event, Payload};
pub use round::{
    store_selection, Decision, DegenerateRound, KeeperOnlyRound, Round, ThresholdCollectionRound,
    ThresholdHandler,
};
pub use state::{consensus_threshold, ReplicatedState};
