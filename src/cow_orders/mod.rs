pub mod behaviours;
pub mod keeper;
pub mod rounds;
pub mod synchronized;

pub use keeper::{randomness_to_unit, select_keeper, KeeperQueue};
pub use rounds::{
    build_round, cow_app_spec, setup_state, timeout_outcome, CowRound, ERROR_PAYLOAD,
    NO_ORDERS_PAYLOAD, ROUND_TIMEOUT, VERIFICATION_FAILED, VERIFICATION_OK,
};
pub use synchronized::{keys, order_reference, SynchronizedData};
