pub mod domain;
pub mod encoding;
pub mod order;

pub use domain::{hash_domain, signing_digest, Eip712Domain, GPV2_SETTLEMENT};
pub use encoding::{encode_data, encode_type, struct_hash, type_hash, TypedField, Types};
pub use order::{
    balance_to_string, compute_order_uid, extract_order_uid_params, kind_to_string,
    normalize_order, order_types, Order, OrderBalance, OrderKind, OrderUid, OrderUidParams,
    ReadyOrder, ORDER_UID_LENGTH,
};
