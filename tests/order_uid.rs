use serde_json::{json, Value};
use watchtower::eip712::{
    balance_to_string, compute_order_uid, extract_order_uid_params, hash_domain, kind_to_string,
    Eip712Domain, Order, OrderBalance, OrderKind, OrderUid, GPV2_SETTLEMENT,
};
use watchtower::error::CodecError;

const GOLDEN_UID: &str = "0xab05afe58e3ce97603c8229fe6fbac517307992df46a5552d02e1b5f1864fdc4cd84cf5e892e77d65c396c50dd77a534ea20b8966489d740";
const OWNER: &str = "0xcD84cF5E892E77d65c396c50DD77A534Ea20b896";

fn domain_json() -> serde_json::Map<String, Value> {
    json!({
        "name": "Gnosis Protocol",
        "version": "v2",
        "chainId": 31337,
        "verifyingContract": GPV2_SETTLEMENT,
    })
    .as_object()
    .cloned()
    .unwrap()
}

fn golden_order() -> Value {
    json!({
        "sellToken": "0x0000000000000000000000000000000000000001",
        "buyToken": "0x0000000000000000000000000000000000000002",
        "receiver": "0x0000000000000000000000000000000000000000",
        "sellAmount": 10,
        "buyAmount": 1,
        "validTo": 1686755136,
        "appData": "0x320530c667bc337342614750b6b7ab2430bdd290c9fff11cdfebd685072ab171",
        "feeAmount": 0,
        "kind": "sell",
        "partiallyFillable": false,
        "sellTokenBalance": "erc20",
        "buyTokenBalance": "erc20",
    })
}

/// The UID of the reference order must match the settlement contract's.
#[test]
fn golden_vector_matches_both_paths() {
    let owner = OWNER.parse().unwrap();
    let uid = compute_order_uid(&domain_json(), &golden_order(), owner).unwrap();
    assert_eq!(uid.to_string(), GOLDEN_UID);

    let domain = Eip712Domain::gpv2(31337, GPV2_SETTLEMENT.parse().unwrap());
    let typed = Order::from_message(&golden_order()).unwrap().uid(&domain, owner).unwrap();
    assert_eq!(typed, uid);

    let params = extract_order_uid_params(uid.as_bytes()).unwrap();
    assert_eq!(params.owner, owner);
    assert_eq!(params.valid_to, 1686755136);
    assert_eq!(params.pack(), uid);
    assert_eq!(GOLDEN_UID.parse::<OrderUid>().unwrap(), uid);
}

/// Orders read from chain carry digests instead of enum names.
#[test]
fn digest_encoded_order_hashes_like_named_order() {
    let mut order = golden_order();
    order["kind"] = json!(format!("0x{}", hex::encode(OrderKind::Sell.hash())));
    order["sellTokenBalance"] = json!(format!("0x{}", hex::encode(OrderBalance::Erc20.hash())));
    order["buyTokenBalance"] = json!(format!("0x{}", hex::encode(OrderBalance::External.hash())));

    let uid = compute_order_uid(&domain_json(), &order, OWNER.parse().unwrap()).unwrap();
    assert_eq!(uid.to_string(), GOLDEN_UID);
}

#[test]
fn unknown_domain_field_is_rejected() {
    let mut domain = domain_json();
    domain.insert("badField".to_string(), json!("x"));
    assert!(matches!(
        hash_domain(&domain),
        Err(CodecError::InvalidDomainField(_))
    ));
}

#[test]
fn uid_length_is_checked() {
    let err = extract_order_uid_params(&[0u8; 55]).unwrap_err();
    assert!(matches!(err, CodecError::InvalidUidLength { actual: 55 }));
    assert!("0x1234".parse::<OrderUid>().is_err());
}

#[test]
fn enum_lookups_cover_every_variant() {
    for kind in OrderKind::ALL {
        let digest = format!("0x{}", hex::encode(kind.hash()));
        assert_eq!(kind_to_string(&digest).unwrap(), kind.as_str());
    }
    for balance in OrderBalance::ALL {
        let digest = format!("0x{}", hex::encode(balance.hash()));
        assert_eq!(balance_to_string(&digest).unwrap(), balance.as_str());
    }

    let err = kind_to_string("0x00").unwrap_err();
    assert!(matches!(err, CodecError::UnknownEnumHash { .. }));
    assert!(err.to_string().contains("kind"));
}
