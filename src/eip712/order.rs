use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use super::domain::{hash_domain, signing_digest, Eip712Domain};
use super::encoding::{
    parse_address, parse_hex_bytes, parse_u32, parse_uint, strip_0x, struct_hash, TypedField,
    Types,
};
use crate::error::CodecError;

/// Length of a packed order UID: digest (32) + owner (20) + validTo (4)
pub const ORDER_UID_LENGTH: usize = 56;

/// GPv2 `Order` members, in declaration order.
pub const ORDER_TYPE_FIELDS: [(&str, &str); 12] = [
    ("sellToken", "address"),
    ("buyToken", "address"),
    ("receiver", "address"),
    ("sellAmount", "uint256"),
    ("buyAmount", "uint256"),
    ("validTo", "uint32"),
    ("appData", "bytes32"),
    ("feeAmount", "uint256"),
    ("kind", "string"),
    ("partiallyFillable", "bool"),
    ("sellTokenBalance", "string"),
    ("buyTokenBalance", "string"),
];

pub fn order_types() -> Types {
    let mut types = Types::new();
    types.insert(
        "Order".to_string(),
        ORDER_TYPE_FIELDS
            .iter()
            .map(|(name, ty)| TypedField::new(name, ty))
            .collect(),
    );
    types
}

/// Order kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Sell,
    Buy,
}

impl OrderKind {
    pub const ALL: [OrderKind; 2] = [OrderKind::Sell, OrderKind::Buy];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Sell => "sell",
            OrderKind::Buy => "buy",
        }
    }

    /// On-chain representation: `keccak256(name)`
    pub fn hash(&self) -> [u8; 32] {
        keccak256(self.as_str().as_bytes())
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderKind {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sell" => Ok(OrderKind::Sell),
            "buy" => Ok(OrderKind::Buy),
            _ => Err(CodecError::InvalidField {
                field: "kind".to_string(),
                reason: format!("unknown order kind '{}'", s),
            }),
        }
    }
}

/// Where token balances are taken from or paid to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderBalance {
    Erc20,
    External,
    Internal,
}

impl OrderBalance {
    pub const ALL: [OrderBalance; 3] = [
        OrderBalance::Erc20,
        OrderBalance::External,
        OrderBalance::Internal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderBalance::Erc20 => "erc20",
            OrderBalance::External => "external",
            OrderBalance::Internal => "internal",
        }
    }

    pub fn hash(&self) -> [u8; 32] {
        keccak256(self.as_str().as_bytes())
    }

    /// Buy balances cannot be external; the settlement contract treats them as erc20.
    pub fn normalize_for_buy(self) -> Self {
        match self {
            OrderBalance::External => OrderBalance::Erc20,
            other => other,
        }
    }
}

impl fmt::Display for OrderBalance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderBalance {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "erc20" => Ok(OrderBalance::Erc20),
            "external" => Ok(OrderBalance::External),
            "internal" => Ok(OrderBalance::Internal),
            _ => Err(CodecError::InvalidField {
                field: "balance".to_string(),
                reason: format!("unknown balance '{}'", s),
            }),
        }
    }
}

fn decode_digest(hash: &str) -> Option<[u8; 32]> {
    let raw = hex::decode(strip_0x(hash)).ok()?;
    raw.try_into().ok()
}

fn looks_like_digest(s: &str) -> bool {
    let digits = strip_0x(s);
    s.len() != digits.len() && digits.len() == 64
}

/// Map an on-chain kind digest back to its name.
pub fn kind_to_string(hash: &str) -> Result<&'static str, CodecError> {
    let digest = decode_digest(hash);
    OrderKind::ALL
        .iter()
        .find(|kind| Some(kind.hash()) == digest)
        .map(|kind| kind.as_str())
        .ok_or_else(|| CodecError::UnknownEnumHash {
            kind: "kind",
            hash: hash.to_string(),
        })
}

/// Map an on-chain balance digest back to its name.
pub fn balance_to_string(hash: &str) -> Result<&'static str, CodecError> {
    let digest = decode_digest(hash);
    OrderBalance::ALL
        .iter()
        .find(|balance| Some(balance.hash()) == digest)
        .map(|balance| balance.as_str())
        .ok_or_else(|| CodecError::UnknownEnumHash {
            kind: "balance type",
            hash: hash.to_string(),
        })
}

fn normalize_balance(value: Option<&Value>, field: &str) -> Result<OrderBalance, CodecError> {
    match value {
        None | Some(Value::Null) => Ok(OrderBalance::Erc20),
        Some(Value::String(s)) if looks_like_digest(s) => balance_to_string(s)?.parse(),
        Some(Value::String(s)) => s.parse(),
        Some(other) => Err(CodecError::InvalidField {
            field: field.to_string(),
            reason: format!("expected a balance name or digest, got {}", other),
        }),
    }
}

/// Bring an order as read from chain (digests for enums, optional receiver and
/// balances) into the message shape the `Order` type hash expects.
pub fn normalize_order(order: &Value) -> Result<Value, CodecError> {
    let mut message: Map<String, Value> =
        order.as_object().cloned().ok_or_else(|| CodecError::InvalidField {
            field: "order".to_string(),
            reason: "expected a JSON object".to_string(),
        })?;

    let kind = match message.get("kind") {
        Some(Value::String(s)) if looks_like_digest(s) => kind_to_string(s)?.parse::<OrderKind>()?,
        Some(Value::String(s)) => s.parse::<OrderKind>()?,
        _ => {
            return Err(CodecError::MissingField {
                ty: "Order".to_string(),
                field: "kind".to_string(),
            })
        }
    };
    message.insert("kind".to_string(), Value::from(kind.as_str()));

    let sell_balance = normalize_balance(message.get("sellTokenBalance"), "sellTokenBalance")?;
    message.insert("sellTokenBalance".to_string(), Value::from(sell_balance.as_str()));

    let buy_balance =
        normalize_balance(message.get("buyTokenBalance"), "buyTokenBalance")?.normalize_for_buy();
    message.insert("buyTokenBalance".to_string(), Value::from(buy_balance.as_str()));

    if matches!(message.get("receiver"), None | Some(Value::Null)) {
        message.insert(
            "receiver".to_string(),
            Value::String(format!("{:?}", Address::zero())),
        );
    }

    Ok(Value::Object(message))
}

/// Decomposed order UID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderUidParams {
    pub order_digest: [u8; 32],
    pub owner: Address,
    pub valid_to: u32,
}

impl OrderUidParams {
    pub fn pack(&self) -> OrderUid {
        let mut packed = [0u8; ORDER_UID_LENGTH];
        packed[..32].copy_from_slice(&self.order_digest);
        packed[32..52].copy_from_slice(self.owner.as_bytes());
        packed[52..].copy_from_slice(&self.valid_to.to_be_bytes());
        OrderUid(packed)
    }
}

/// Unpack a UID into digest, owner and expiry.
pub fn extract_order_uid_params(uid: &[u8]) -> Result<OrderUidParams, CodecError> {
    if uid.len() != ORDER_UID_LENGTH {
        return Err(CodecError::InvalidUidLength { actual: uid.len() });
    }
    let mut order_digest = [0u8; 32];
    order_digest.copy_from_slice(&uid[..32]);
    let mut valid_to = [0u8; 4];
    valid_to.copy_from_slice(&uid[52..]);

    Ok(OrderUidParams {
        order_digest,
        owner: Address::from_slice(&uid[32..52]),
        valid_to: u32::from_be_bytes(valid_to),
    })
}

/// Compute the UID of a JSON order owned by `owner` under `domain`.
pub fn compute_order_uid(
    domain: &Map<String, Value>,
    order: &Value,
    owner: Address,
) -> Result<OrderUid, CodecError> {
    let message = normalize_order(order)?;
    let valid_to = parse_u32(
        message.get("validTo").unwrap_or(&Value::Null),
        "validTo",
    )?;
    let digest = signing_digest(
        &hash_domain(domain)?,
        &struct_hash("Order", &message, &order_types())?,
    );

    Ok(OrderUidParams {
        order_digest: digest,
        owner,
        valid_to,
    }
    .pack())
}

/// 56-byte order identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OrderUid(pub [u8; ORDER_UID_LENGTH]);

impl OrderUid {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn params(&self) -> OrderUidParams {
        // length is fixed by the type
        let mut order_digest = [0u8; 32];
        order_digest.copy_from_slice(&self.0[..32]);
        let mut valid_to = [0u8; 4];
        valid_to.copy_from_slice(&self.0[52..]);
        OrderUidParams {
            order_digest,
            owner: Address::from_slice(&self.0[32..52]),
            valid_to: u32::from_be_bytes(valid_to),
        }
    }
}

impl TryFrom<&[u8]> for OrderUid {
    type Error = CodecError;

    fn try_from(raw: &[u8]) -> Result<Self, Self::Error> {
        Ok(extract_order_uid_params(raw)?.pack())
    }
}

impl fmt::Display for OrderUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for OrderUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OrderUid({})", self)
    }
}

impl FromStr for OrderUid {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(strip_0x(s.trim())).map_err(|e| CodecError::InvalidField {
            field: "orderUid".to_string(),
            reason: format!("invalid hex: {}", e),
        })?;
        OrderUid::try_from(raw.as_slice())
    }
}

impl Serialize for OrderUid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for OrderUid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Amounts travel as decimal strings, matching the order book API.
mod u256_decimal {
    use super::*;

    pub fn serialize<S: Serializer>(n: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&n.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let value = Value::deserialize(deserializer)?;
        parse_uint(&value, "amount").map_err(serde::de::Error::custom)
    }
}

/// GPv2 order, normalised
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub sell_token: Address,
    pub buy_token: Address,
    pub receiver: Address,
    #[serde(with = "u256_decimal")]
    pub sell_amount: U256,
    #[serde(with = "u256_decimal")]
    pub buy_amount: U256,
    pub valid_to: u32,
    pub app_data: H256,
    #[serde(with = "u256_decimal")]
    pub fee_amount: U256,
    pub kind: OrderKind,
    pub partially_fillable: bool,
    pub sell_token_balance: OrderBalance,
    pub buy_token_balance: OrderBalance,
}

impl Order {
    /// Parse an order message, accepting chain-side digests for the enums.
    pub fn from_message(order: &Value) -> Result<Self, CodecError> {
        let message = normalize_order(order)?;
        let field = |name: &str| message.get(name).cloned().unwrap_or(Value::Null);

        let app_data = parse_hex_bytes(&field("appData"), "appData")?;
        if app_data.len() != 32 {
            return Err(CodecError::InvalidField {
                field: "appData".to_string(),
                reason: format!("expected 32 bytes, got {}", app_data.len()),
            });
        }
        let partially_fillable =
            field("partiallyFillable")
                .as_bool()
                .ok_or_else(|| CodecError::InvalidField {
                    field: "partiallyFillable".to_string(),
                    reason: "expected a boolean".to_string(),
                })?;

        Ok(Self {
            sell_token: parse_address(&field("sellToken"), "sellToken")?,
            buy_token: parse_address(&field("buyToken"), "buyToken")?,
            receiver: parse_address(&field("receiver"), "receiver")?,
            sell_amount: parse_uint(&field("sellAmount"), "sellAmount")?,
            buy_amount: parse_uint(&field("buyAmount"), "buyAmount")?,
            valid_to: parse_u32(&field("validTo"), "validTo")?,
            app_data: H256::from_slice(&app_data),
            fee_amount: parse_uint(&field("feeAmount"), "feeAmount")?,
            kind: field("kind").as_str().unwrap_or_default().parse()?,
            partially_fillable,
            sell_token_balance: field("sellTokenBalance").as_str().unwrap_or_default().parse()?,
            buy_token_balance: field("buyTokenBalance").as_str().unwrap_or_default().parse()?,
        })
    }

    pub fn to_message(&self) -> Value {
        // Every member serializes to a string, number or bool
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn struct_hash(&self) -> Result<[u8; 32], CodecError> {
        struct_hash("Order", &self.to_message(), &order_types())
    }

    pub fn uid(&self, domain: &Eip712Domain, owner: Address) -> Result<OrderUid, CodecError> {
        Ok(OrderUidParams {
            order_digest: signing_digest(&domain.separator_hash()?, &self.struct_hash()?),
            owner,
            valid_to: self.valid_to,
        }
        .pack())
    }
}

/// Tradeable order ready for the order book, with its locally computed UID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyOrder {
    #[serde(flatten)]
    pub order: Order,
    pub signing_scheme: String,
    pub signature: String,
    pub from: Address,
    pub order_uid: OrderUid,
}

impl ReadyOrder {
    /// Build from a tradeable order as returned by the conditional-order contract.
    pub fn from_tradeable(raw: &Value, domain: &Eip712Domain) -> Result<Self, CodecError> {
        let order = Order::from_message(raw)?;
        let from = parse_address(raw.get("from").unwrap_or(&Value::Null), "from")?;
        let order_uid = order.uid(domain, from)?;

        Ok(Self {
            order,
            signing_scheme: raw
                .get("signingScheme")
                .and_then(Value::as_str)
                .unwrap_or("eip1271")
                .to_string(),
            signature: raw
                .get("signature")
                .and_then(Value::as_str)
                .unwrap_or("0x")
                .to_string(),
            from,
            order_uid,
        })
    }

    /// Recompute the UID from the order contents.
    pub fn recompute_uid(&self, domain: &Eip712Domain) -> Result<OrderUid, CodecError> {
        self.order.uid(domain, self.from)
    }

    /// JSON body for `POST /orders`
    pub fn api_body(&self) -> Value {
        let mut body = self.order.to_message();
        if let Value::Object(map) = &mut body {
            map.insert("signingScheme".to_string(), Value::from(self.signing_scheme.clone()));
            map.insert("signature".to_string(), Value::from(self.signature.clone()));
            map.insert("from".to_string(), Value::String(format!("{:?}", self.from)));
        }
        body
    }
}
