use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, H160, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::CodecError;

/// Mainnet TWAP handler, 0x6cF1e9cA41f7611dEf408122793c358a3d11E5a5
pub const TWAP_HANDLER: Address = H160([
    0x6c, 0xf1, 0xe9, 0xca, 0x41, 0xf7, 0x61, 0x1d, 0xef, 0x40, 0x81, 0x22, 0x79, 0x3c, 0x35, 0x8a,
    0x3d, 0x11, 0xe5, 0xa5,
]);

/// `IConditionalOrder.ConditionalOrderParams`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalOrderParams {
    pub handler: Address,
    pub salt: H256,
    pub static_input: Bytes,
}

impl ConditionalOrderParams {
    /// `keccak256(abi.encode(params))`, the on-chain identifier of a single order
    pub fn hash(&self) -> H256 {
        let encoded = abi::encode(&[Token::Tuple(vec![
            Token::Address(self.handler),
            Token::FixedBytes(self.salt.as_bytes().to_vec()),
            Token::Bytes(self.static_input.to_vec()),
        ])]);
        H256::from(keccak256(encoded))
    }
}

/// Merkle proof for orders registered through a root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    pub merkle_root: H256,
    pub path: Vec<H256>,
}

/// Locally tracked conditional order. `id` is local and never replicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalOrder {
    pub id: String,
    pub owner: Address,
    pub params: ConditionalOrderParams,
    pub proof: Option<Proof>,
    pub offchain_input: Bytes,
    pub composable_cow: Address,
}

/// TWAP handler static input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwapData {
    pub sell_token: Address,
    pub buy_token: Address,
    pub receiver: Address,
    pub part_sell_amount: U256,
    pub min_part_limit: U256,
    pub t0: U256,
    pub n: U256,
    pub t: U256,
    pub span: U256,
    pub app_data: H256,
}

fn twap_param_type() -> ParamType {
    ParamType::Tuple(vec![
        ParamType::Address,
        ParamType::Address,
        ParamType::Address,
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::FixedBytes(32),
    ])
}

fn saturating_u64(n: U256) -> u64 {
    if n.bits() > 64 {
        u64::MAX
    } else {
        n.as_u64()
    }
}

impl TwapData {
    pub fn decode(static_input: &[u8]) -> Result<Self, CodecError> {
        let bad = |reason: String| CodecError::InvalidField {
            field: "staticInput".to_string(),
            reason,
        };

        let tokens = abi::decode(&[twap_param_type()], static_input)
            .map_err(|e| bad(format!("not a TWAP struct: {}", e)))?;
        let Some(Token::Tuple(fields)) = tokens.into_iter().next() else {
            return Err(bad("expected a tuple".to_string()));
        };

        let mut addresses = Vec::with_capacity(3);
        let mut numbers = Vec::with_capacity(6);
        let mut app_data = None;
        for token in fields {
            match token {
                Token::Address(a) => addresses.push(a),
                Token::Uint(n) => numbers.push(n),
                Token::FixedBytes(b) if b.len() == 32 => app_data = Some(H256::from_slice(&b)),
                other => return Err(bad(format!("unexpected member {:?}", other))),
            }
        }
        let (Ok([sell_token, buy_token, receiver]), Ok([part_sell_amount, min_part_limit, t0, n, t, span]), Some(app_data)) =
            (<[Address; 3]>::try_from(addresses), <[U256; 6]>::try_from(numbers), app_data)
        else {
            return Err(bad("wrong member layout".to_string()));
        };

        Ok(Self {
            sell_token,
            buy_token,
            receiver,
            part_sell_amount,
            min_part_limit,
            t0,
            n,
            t,
            span,
            app_data,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        abi::encode(&[Token::Tuple(vec![
            Token::Address(self.sell_token),
            Token::Address(self.buy_token),
            Token::Address(self.receiver),
            Token::Uint(self.part_sell_amount),
            Token::Uint(self.min_part_limit),
            Token::Uint(self.t0),
            Token::Uint(self.n),
            Token::Uint(self.t),
            Token::Uint(self.span),
            Token::FixedBytes(self.app_data.as_bytes().to_vec()),
        ])])
    }

    /// First part's start. `t0 == 0` means "start when created", which the
    /// contract records in its cabinet.
    pub fn start_timestamp(&self, cabinet_start: u64) -> u64 {
        if self.t0.is_zero() {
            cabinet_start
        } else {
            saturating_u64(self.t0)
        }
    }

    /// End of validity: `start + n*t`, or `start + (n-1)*t + span` when each
    /// part is only valid for `span` seconds.
    pub fn end_timestamp(&self, start: u64) -> u64 {
        let start = U256::from(start);
        let end = if self.span.is_zero() {
            start.saturating_add(self.n.saturating_mul(self.t))
        } else {
            start
                .saturating_add(self.n.saturating_sub(U256::one()).saturating_mul(self.t))
                .saturating_add(self.span)
        };
        saturating_u64(end)
    }

    /// An order that has not started yet is kept; one past its end is dropped.
    pub fn should_drop(&self, block_timestamp: u64, cabinet_start: u64) -> bool {
        let start = self.start_timestamp(cabinet_start);
        if start > block_timestamp {
            return false;
        }
        block_timestamp >= self.end_timestamp(start)
    }

    /// The part tradeable at `block_timestamp` as an order message signed
    /// by `owner`, or `None` outside the order's lifetime.
    pub fn part_order(&self, owner: Address, cabinet_start: u64, block_timestamp: u64) -> Option<Value> {
        let start = self.start_timestamp(cabinet_start);
        let t = saturating_u64(self.t);
        if t == 0 || block_timestamp < start || self.should_drop(block_timestamp, cabinet_start) {
            return None;
        }

        let part = (block_timestamp - start) / t;
        let part_start = start.saturating_add(part.saturating_mul(t));
        let valid_to = if self.span.is_zero() {
            part_start.saturating_add(t - 1)
        } else {
            part_start.saturating_add(saturating_u64(self.span)).saturating_sub(1)
        };

        Some(json!({
            "sellToken": format!("{:?}", self.sell_token),
            "buyToken": format!("{:?}", self.buy_token),
            "receiver": format!("{:?}", self.receiver),
            "sellAmount": self.part_sell_amount.to_string(),
            "buyAmount": self.min_part_limit.to_string(),
            "validTo": valid_to.min(u64::from(u32::MAX)),
            "appData": format!("{:?}", self.app_data),
            "feeAmount": 0,
            "kind": "sell",
            "partiallyFillable": false,
            "sellTokenBalance": "erc20",
            "buyTokenBalance": "erc20",
            "signingScheme": "eip1271",
            "from": format!("{:?}", owner),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn twap(t0: u64, n: u64, t: u64, span: u64) -> TwapData {
        TwapData {
            sell_token: Address::from_low_u64_be(1),
            buy_token: Address::from_low_u64_be(2),
            receiver: Address::zero(),
            part_sell_amount: U256::from(100),
            min_part_limit: U256::from(1),
            t0: U256::from(t0),
            n: U256::from(n),
            t: U256::from(t),
            span: U256::from(span),
            app_data: H256::repeat_byte(0xaa),
        }
    }

    #[test]
    fn test_twap_decode_matches_encoded_struct() {
        let data = twap(1_000, 10, 60, 0);
        let encoded = data.encode();
        assert_eq!(encoded.len(), 10 * 32);
        assert_eq!(TwapData::decode(&encoded).unwrap(), data);
        assert!(TwapData::decode(&encoded[..100]).is_err());
    }

    #[test]
    fn test_end_timestamp() {
        // n parts of t seconds
        assert_eq!(twap(1_000, 10, 60, 0).end_timestamp(1_000), 1_600);
        // last part only valid for span
        assert_eq!(twap(1_000, 10, 60, 30).end_timestamp(1_000), 1_570);
    }

    #[test]
    fn test_should_drop() {
        let data = twap(1_000, 10, 60, 0);
        assert!(!data.should_drop(999, 0));
        assert!(!data.should_drop(1_599, 0));
        assert!(data.should_drop(1_600, 0));

        // Start taken from the cabinet when t0 is unset
        let data = twap(0, 2, 60, 0);
        assert!(!data.should_drop(5_100, 5_000));
        assert!(data.should_drop(5_120, 5_000));
    }

    #[test]
    fn test_part_order_follows_block_time() {
        let data = twap(1_000, 3, 60, 0);
        let owner = Address::from_low_u64_be(0xc0ffee);

        assert!(data.part_order(owner, 0, 999).is_none());
        let first = data.part_order(owner, 0, 1_000).unwrap();
        assert_eq!(first["validTo"], json!(1_059));
        let last = data.part_order(owner, 0, 1_130).unwrap();
        assert_eq!(last["validTo"], json!(1_179));
        assert_eq!(last["sellAmount"], json!("100"));
        assert!(data.part_order(owner, 0, 1_180).is_none());
    }

    #[test]
    fn test_twap_handler_address() {
        assert_eq!(
            TWAP_HANDLER,
            "0x6cF1e9cA41f7611dEf408122793c358a3d11E5a5".parse::<Address>().unwrap()
        );
    }

    #[test]
    fn test_params_hash_is_stable() {
        let params = ConditionalOrderParams {
            handler: Address::from_low_u64_be(7),
            salt: H256::repeat_byte(1),
            static_input: Bytes::from(vec![1, 2, 3]),
        };
        assert_eq!(params.hash(), params.clone().hash());

        let other = ConditionalOrderParams {
            salt: H256::repeat_byte(2),
            ..params.clone()
        };
        assert_ne!(params.hash(), other.hash());
    }
}
