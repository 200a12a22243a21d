use ethers::types::{Address, H256};
use ethers::utils::keccak256;
use serde_json::{Map, Value};

use super::encoding::{struct_hash, TypedField, Types};
use crate::error::CodecError;

/// Settlement contract domain name
pub const GPV2_DOMAIN_NAME: &str = "Gnosis Protocol";
/// Settlement contract domain version
pub const GPV2_DOMAIN_VERSION: &str = "v2";
/// GPv2Settlement, deployed at the same address on every supported chain
pub const GPV2_SETTLEMENT: &str = "0x9008D19f58AAbD9eD0D60971565AA8510560ab41";

/// Allowed domain members, in the order they appear in `EIP712Domain`.
pub const DOMAIN_FIELDS: [(&str, &str); 5] = [
    ("name", "string"),
    ("version", "string"),
    ("chainId", "uint256"),
    ("verifyingContract", "address"),
    ("salt", "bytes32"),
];

/// `EIP712Domain` member list for the keys present in `domain`.
pub fn domain_type(domain: &Map<String, Value>) -> Result<Vec<TypedField>, CodecError> {
    if let Some(bad) = domain
        .keys()
        .find(|key| !DOMAIN_FIELDS.iter().any(|(name, _)| name == key))
    {
        return Err(CodecError::InvalidDomainField(bad.clone()));
    }

    Ok(DOMAIN_FIELDS
        .iter()
        .filter(|(name, _)| domain.contains_key(*name))
        .map(|(name, ty)| TypedField::new(name, ty))
        .collect())
}

/// Domain separator of a JSON domain object.
pub fn hash_domain(domain: &Map<String, Value>) -> Result<[u8; 32], CodecError> {
    let mut types = Types::new();
    types.insert("EIP712Domain".to_string(), domain_type(domain)?);
    struct_hash("EIP712Domain", &Value::Object(domain.clone()), &types)
}

/// `keccak256(0x19 || 0x01 || domainSeparator || hashStruct(message))`
pub fn signing_digest(domain_separator: &[u8; 32], struct_hash: &[u8; 32]) -> [u8; 32] {
    let mut encoded = Vec::with_capacity(66);
    encoded.extend_from_slice(b"\x19\x01");
    encoded.extend_from_slice(domain_separator);
    encoded.extend_from_slice(struct_hash);
    keccak256(&encoded)
}

/// EIP-712 domain for order hashing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eip712Domain {
    pub name: Option<String>,
    pub version: Option<String>,
    pub chain_id: Option<u64>,
    pub verifying_contract: Option<Address>,
    pub salt: Option<H256>,
}

impl Eip712Domain {
    /// Domain of the GPv2 settlement contract on `chain_id`
    pub fn gpv2(chain_id: u64, settlement: Address) -> Self {
        Self {
            name: Some(GPV2_DOMAIN_NAME.to_string()),
            version: Some(GPV2_DOMAIN_VERSION.to_string()),
            chain_id: Some(chain_id),
            verifying_contract: Some(settlement),
            salt: None,
        }
    }

    pub fn to_json(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(name) = &self.name {
            map.insert("name".to_string(), Value::String(name.clone()));
        }
        if let Some(version) = &self.version {
            map.insert("version".to_string(), Value::String(version.clone()));
        }
        if let Some(chain_id) = self.chain_id {
            map.insert("chainId".to_string(), Value::from(chain_id));
        }
        if let Some(contract) = self.verifying_contract {
            map.insert(
                "verifyingContract".to_string(),
                Value::String(format!("{:?}", contract)),
            );
        }
        if let Some(salt) = self.salt {
            map.insert("salt".to_string(), Value::String(format!("{:?}", salt)));
        }
        map
    }

    /// Compute the EIP-712 domain separator hash
    pub fn separator_hash(&self) -> Result<[u8; 32], CodecError> {
        hash_domain(&self.to_json())
    }
}
