//! Generic EIP-712 struct hashing over a type schema.
//!
//! Values are supplied as JSON so that orders coming from the contract reader,
//! the replicated state and the order book can all be hashed the same way.
//! Integers may be JSON numbers, decimal strings or `0x` hex strings; anything
//! that does not fit the declared width is rejected rather than truncated.

use ethers::types::{Address, I256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::CodecError;

/// One `type name` member of a struct definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedField {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

impl TypedField {
    pub fn new(name: &str, ty: &str) -> Self {
        Self {
            name: name.to_string(),
            ty: ty.to_string(),
        }
    }
}

/// Struct name -> ordered member list
pub type Types = BTreeMap<String, Vec<TypedField>>;

/// Strip any array suffix: `Foo[][3]` -> `Foo`.
fn base_type(ty: &str) -> &str {
    match ty.find('[') {
        Some(idx) => &ty[..idx],
        None => ty,
    }
}

fn collect_dependencies(ty: &str, types: &Types, found: &mut BTreeSet<String>) {
    let name = base_type(ty);
    if found.contains(name) {
        return;
    }
    let Some(fields) = types.get(name) else {
        return;
    };
    found.insert(name.to_string());
    for field in fields {
        collect_dependencies(&field.ty, types, found);
    }
}

fn struct_definition(name: &str, fields: &[TypedField]) -> String {
    let members: Vec<String> = fields
        .iter()
        .map(|f| format!("{} {}", f.ty, f.name))
        .collect();
    format!("{}({})", name, members.join(","))
}

/// Canonical type signature: the primary struct followed by every struct it
/// references, transitively, sorted by name.
pub fn encode_type(primary: &str, types: &Types) -> Result<String, CodecError> {
    let primary = base_type(primary);
    let fields = types
        .get(primary)
        .ok_or_else(|| CodecError::UnknownType(primary.to_string()))?;

    let mut deps = BTreeSet::new();
    collect_dependencies(primary, types, &mut deps);
    deps.remove(primary);

    let mut signature = struct_definition(primary, fields);
    for dep in &deps {
        if let Some(dep_fields) = types.get(dep) {
            signature.push_str(&struct_definition(dep, dep_fields));
        }
    }
    Ok(signature)
}

pub fn type_hash(primary: &str, types: &Types) -> Result<[u8; 32], CodecError> {
    Ok(keccak256(encode_type(primary, types)?.as_bytes()))
}

/// `typeHash || enc(field_1) || ... || enc(field_n)`
pub fn encode_data(primary: &str, data: &Value, types: &Types) -> Result<Vec<u8>, CodecError> {
    let fields = types
        .get(primary)
        .ok_or_else(|| CodecError::UnknownType(primary.to_string()))?;

    let mut encoded = Vec::with_capacity(32 * (fields.len() + 1));
    encoded.extend_from_slice(&type_hash(primary, types)?);

    for field in fields {
        let value = data.get(&field.name).ok_or_else(|| CodecError::MissingField {
            ty: primary.to_string(),
            field: field.name.clone(),
        })?;
        encoded.extend_from_slice(&encode_value(&field.ty, value, types, &field.name)?);
    }
    Ok(encoded)
}

pub fn struct_hash(primary: &str, data: &Value, types: &Types) -> Result<[u8; 32], CodecError> {
    Ok(keccak256(encode_data(primary, data, types)?))
}

/// Encode a single member to its 32-byte word.
pub fn encode_value(
    ty: &str,
    value: &Value,
    types: &Types,
    field: &str,
) -> Result<[u8; 32], CodecError> {
    if let Some(open) = ty.rfind('[') {
        if !ty.ends_with(']') {
            return Err(CodecError::UnknownType(ty.to_string()));
        }
        let element_ty = &ty[..open];
        let items = value
            .as_array()
            .ok_or_else(|| invalid(field, "expected an array"))?;

        let declared_len = &ty[open + 1..ty.len() - 1];
        if !declared_len.is_empty() {
            let expected: usize = declared_len
                .parse()
                .map_err(|_| CodecError::UnknownType(ty.to_string()))?;
            if items.len() != expected {
                return Err(invalid(
                    field,
                    &format!("expected {} elements, got {}", expected, items.len()),
                ));
            }
        }

        let mut concatenated = Vec::with_capacity(32 * items.len());
        for item in items {
            concatenated.extend_from_slice(&encode_value(element_ty, item, types, field)?);
        }
        return Ok(keccak256(concatenated));
    }

    match ty {
        "string" => {
            let s = value
                .as_str()
                .ok_or_else(|| invalid(field, "expected a string"))?;
            Ok(keccak256(s.as_bytes()))
        }
        "bytes" => Ok(keccak256(parse_hex_bytes(value, field)?)),
        "bool" => {
            let flag = value
                .as_bool()
                .ok_or_else(|| invalid(field, "expected a boolean"))?;
            Ok(word_from_u256(U256::from(flag as u8)))
        }
        "address" => {
            let address = parse_address(value, field)?;
            let mut word = [0u8; 32];
            word[12..].copy_from_slice(address.as_bytes());
            Ok(word)
        }
        _ if types.contains_key(ty) => struct_hash(ty, value, types),
        _ if ty.starts_with("uint") => {
            let bits = parse_width(ty, "uint")?;
            let n = parse_uint(value, field)?;
            check_uint_width(n, bits, ty)?;
            Ok(word_from_u256(n))
        }
        _ if ty.starts_with("int") => {
            let bits = parse_width(ty, "int")?;
            let n = parse_int(value, field)?;
            check_int_width(n, bits, ty)?;
            Ok(word_from_u256(n.into_raw()))
        }
        _ if ty.starts_with("bytes") => {
            let size: usize = ty["bytes".len()..]
                .parse()
                .map_err(|_| CodecError::UnknownType(ty.to_string()))?;
            if size == 0 || size > 32 {
                return Err(CodecError::UnknownType(ty.to_string()));
            }
            let raw = parse_hex_bytes(value, field)?;
            if raw.len() > size {
                return Err(CodecError::ValueOutOfRange {
                    ty: ty.to_string(),
                    value: value.to_string(),
                });
            }
            let mut word = [0u8; 32];
            word[..raw.len()].copy_from_slice(&raw);
            Ok(word)
        }
        _ => Err(CodecError::UnknownType(ty.to_string())),
    }
}

fn invalid(field: &str, reason: &str) -> CodecError {
    CodecError::InvalidField {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn word_from_u256(n: U256) -> [u8; 32] {
    let mut word = [0u8; 32];
    n.to_big_endian(&mut word);
    word
}

fn parse_width(ty: &str, prefix: &str) -> Result<usize, CodecError> {
    let digits = &ty[prefix.len()..];
    if digits.is_empty() {
        return Ok(256);
    }
    match digits.parse::<usize>() {
        Ok(bits) if bits > 0 && bits <= 256 && bits % 8 == 0 => Ok(bits),
        _ => Err(CodecError::UnknownType(ty.to_string())),
    }
}

fn check_uint_width(n: U256, bits: usize, ty: &str) -> Result<(), CodecError> {
    if bits < 256 && n.bits() > bits {
        return Err(CodecError::ValueOutOfRange {
            ty: ty.to_string(),
            value: n.to_string(),
        });
    }
    Ok(())
}

fn check_int_width(n: I256, bits: usize, ty: &str) -> Result<(), CodecError> {
    if bits < 256 {
        let bound = I256::from_raw(U256::one() << (bits - 1));
        if n >= bound || n < -bound {
            return Err(CodecError::ValueOutOfRange {
                ty: ty.to_string(),
                value: n.to_string(),
            });
        }
    }
    Ok(())
}

pub(crate) fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

pub(crate) fn parse_hex_bytes(value: &Value, field: &str) -> Result<Vec<u8>, CodecError> {
    let s = value
        .as_str()
        .ok_or_else(|| invalid(field, "expected a hex string"))?;
    hex::decode(strip_0x(s)).map_err(|e| invalid(field, &format!("invalid hex: {}", e)))
}

pub(crate) fn parse_address(value: &Value, field: &str) -> Result<Address, CodecError> {
    let s = value
        .as_str()
        .ok_or_else(|| invalid(field, "expected an address string"))?;
    let raw = hex::decode(strip_0x(s)).map_err(|e| invalid(field, &format!("invalid hex: {}", e)))?;
    if raw.len() != 20 {
        return Err(invalid(field, &format!("address must be 20 bytes, got {}", raw.len())));
    }
    Ok(Address::from_slice(&raw))
}

pub(crate) fn parse_uint(value: &Value, field: &str) -> Result<U256, CodecError> {
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                Ok(U256::from(v))
            } else if n.is_i64() {
                Err(CodecError::ValueOutOfRange {
                    ty: "uint".to_string(),
                    value: n.to_string(),
                })
            } else {
                Err(invalid(field, "expected an integer"))
            }
        }
        Value::String(s) => {
            let s = s.trim();
            if s.starts_with("0x") || s.starts_with("0X") {
                let digits = strip_0x(s);
                if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(invalid(field, "invalid hex integer"));
                }
                U256::from_str_radix(digits, 16).map_err(|_| CodecError::ValueOutOfRange {
                    ty: "uint256".to_string(),
                    value: s.to_string(),
                })
            } else if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
                U256::from_dec_str(s).map_err(|_| CodecError::ValueOutOfRange {
                    ty: "uint256".to_string(),
                    value: s.to_string(),
                })
            } else if s.starts_with('-') {
                Err(CodecError::ValueOutOfRange {
                    ty: "uint".to_string(),
                    value: s.to_string(),
                })
            } else {
                Err(invalid(field, "expected a decimal or hex integer"))
            }
        }
        _ => Err(invalid(field, "expected an integer")),
    }
}

fn parse_int(value: &Value, field: &str) -> Result<I256, CodecError> {
    let text = match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return Err(invalid(field, "expected an integer")),
    };
    let digits = text.strip_prefix('-').unwrap_or(&text);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid(field, "expected a decimal integer"));
    }
    I256::from_dec_str(&text).map_err(|_| CodecError::ValueOutOfRange {
        ty: "int256".to_string(),
        value: text.clone(),
    })
}

/// Parse a `uint32` member without going through a 32-byte word.
pub(crate) fn parse_u32(value: &Value, field: &str) -> Result<u32, CodecError> {
    let n = parse_uint(value, field)?;
    check_uint_width(n, 32, "uint32")?;
    Ok(n.as_u32())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mail_types() -> Types {
        let mut types = Types::new();
        types.insert(
            "Person".to_string(),
            vec![
                TypedField::new("name", "string"),
                TypedField::new("wallet", "address"),
            ],
        );
        types.insert(
            "Mail".to_string(),
            vec![
                TypedField::new("from", "Person"),
                TypedField::new("to", "Person"),
                TypedField::new("contents", "string"),
            ],
        );
        types
    }

    fn mail() -> Value {
        json!({
            "from": {"name": "Cow", "wallet": "0xCD2a3d9F938E13CD947Ec05AbC7FE734Df8DD826"},
            "to": {"name": "Bob", "wallet": "0xbBbBBBBbbBBBbbbBbbBbbbbBBbBbbbbBbBbbBBbB"},
            "contents": "Hello, Bob!"
        })
    }

    #[test]
    fn test_encode_type_appends_sorted_dependencies() {
        let types = mail_types();
        assert_eq!(
            encode_type("Mail", &types).unwrap(),
            "Mail(Person from,Person to,string contents)Person(string name,address wallet)"
        );
    }

    #[test]
    fn test_eip712_reference_mail_hash() {
        // Mail example from EIP-712
        let types = mail_types();
        assert_eq!(
            hex::encode(type_hash("Mail", &types).unwrap()),
            "a0cedeb2dc280ba39b857546d74f5549c3a1d7bdc2dd96bf881f76108e23dac2"
        );
        assert_eq!(
            hex::encode(struct_hash("Mail", &mail(), &types).unwrap()),
            "c52c0ee5d84264471806290a3f2c4cecfc5490626bf912d01f240d7a274b371e"
        );
    }

    #[test]
    fn test_missing_field_is_reported() {
        let types = mail_types();
        let mut data = mail();
        data.as_object_mut().unwrap().remove("contents");
        let err = struct_hash("Mail", &data, &types).unwrap_err();
        assert_eq!(
            err,
            CodecError::MissingField {
                ty: "Mail".to_string(),
                field: "contents".to_string()
            }
        );
    }

    #[test]
    fn test_uint_out_of_range_fails_instead_of_wrapping() {
        let types = Types::new();
        let err = encode_value("uint32", &json!(4_294_967_296u64), &types, "validTo").unwrap_err();
        assert!(matches!(err, CodecError::ValueOutOfRange { .. }));

        let err = encode_value("uint256", &json!("-1"), &types, "amount").unwrap_err();
        assert!(matches!(err, CodecError::ValueOutOfRange { .. }));

        let too_big = format!("1{}", "0".repeat(78));
        let err = encode_value("uint256", &json!(too_big), &types, "amount").unwrap_err();
        assert!(matches!(err, CodecError::ValueOutOfRange { .. }));

        let word = encode_value("uint32", &json!(4_294_967_295u64), &types, "validTo").unwrap();
        assert_eq!(&word[28..], &[0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn test_int_is_twos_complement() {
        let types = Types::new();
        let word = encode_value("int8", &json!(-1), &types, "delta").unwrap();
        assert_eq!(word, [0xff; 32]);

        let err = encode_value("int8", &json!(128), &types, "delta").unwrap_err();
        assert!(matches!(err, CodecError::ValueOutOfRange { .. }));
    }

    #[test]
    fn test_arrays_hash_concatenated_words() {
        let types = Types::new();
        let word = encode_value("uint256[]", &json!([1, 2]), &types, "xs").unwrap();

        let mut concatenated = [0u8; 64];
        concatenated[31] = 1;
        concatenated[63] = 2;
        assert_eq!(word, keccak256(concatenated));

        let err = encode_value("uint256[3]", &json!([1, 2]), &types, "xs").unwrap_err();
        assert!(matches!(err, CodecError::InvalidField { .. }));
    }

    #[test]
    fn test_fixed_bytes_are_right_padded() {
        let types = Types::new();
        let word = encode_value("bytes4", &json!("0xdeadbeef"), &types, "selector").unwrap();
        assert_eq!(&word[..4], &[0xde, 0xad, 0xbe, 0xef]);
        assert!(word[4..].iter().all(|b| *b == 0));

        let err = encode_value("bytes2", &json!("0xdeadbeef"), &types, "selector").unwrap_err();
        assert!(matches!(err, CodecError::ValueOutOfRange { .. }));
    }
}
