use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bech32::{Bech32, Hrp};
use bitcoin::hashes::{hash160, sha256, Hash};
use secp256k1::PublicKey;
use serde_json::Value;
use tracing::warn;

use crate::rpc_client::types::MergedTx;

const SECP256K1_KEY: &str = "/cosmos.crypto.secp256k1.PubKey";
const ED25519_KEY: &str = "/cosmos.crypto.ed25519.PubKey";
const MULTISIG_KEY: &str = "/cosmos.crypto.multisig.LegacyAminoPubKey";

/// Encode raw account bytes with the chain's bech32 prefix.
pub fn bech32_address(prefix: &str, bytes: &[u8]) -> Result<String> {
    let hrp = Hrp::parse(prefix).with_context(|| format!("Invalid bech32 prefix {}", prefix))?;
    bech32::encode::<Bech32>(hrp, bytes).context("Failed to bech32 encode address")
}

/// Derive an account address from a signer's `public_key` JSON object.
/// Multisig accounts are attributed to their first member key.
pub fn address_from_public_key(prefix: &str, public_key: &Value) -> Result<String> {
    let key_type = public_key
        .get("@type")
        .and_then(Value::as_str)
        .unwrap_or_default();

    if key_type == MULTISIG_KEY {
        let first = public_key
            .get("public_keys")
            .and_then(Value::as_array)
            .and_then(|keys| keys.first())
            .ok_or_else(|| anyhow!("Multisig public key has no members"))?;
        return address_from_public_key(prefix, first);
    }

    let encoded = public_key
        .get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Public key of type {:?} has no key field", key_type))?;
    let raw = decode_key_bytes(encoded)?;

    let account_bytes = match key_type {
        ED25519_KEY => sha256::Hash::hash(&raw).to_byte_array()[..20].to_vec(),
        SECP256K1_KEY | "" => {
            // Normalise to the compressed form before hashing.
            let key = PublicKey::from_slice(&raw).context("Invalid secp256k1 public key")?;
            hash160::Hash::hash(&key.serialize()).to_byte_array().to_vec()
        }
        other => return Err(anyhow!("Unsupported public key type {}", other)),
    };

    bech32_address(prefix, &account_bytes)
}

/// Account address of a named module, e.g. the distribution module's community pool.
pub fn module_address(prefix: &str, module: &str) -> Result<String> {
    let hash = sha256::Hash::hash(module.as_bytes()).to_byte_array();
    bech32_address(prefix, &hash[..20])
}

/// Human-readable part of a bech32 address.
pub fn address_prefix(address: &str) -> Option<String> {
    bech32::decode(address).ok().map(|(hrp, _)| hrp.to_string())
}

fn decode_key_bytes(encoded: &str) -> Result<Vec<u8>> {
    if let Ok(bytes) = hex::decode(encoded) {
        if bytes.len() == 33 || bytes.len() == 32 || bytes.len() == 65 {
            return Ok(bytes);
        }
    }
    STANDARD
        .decode(encoded)
        .with_context(|| format!("Public key {} is neither hex nor base64", encoded))
}

/// Body fields that name the signing account, in the order they are tried.
const MESSAGE_SIGNER_FIELDS: &[&str] = &[
    "signer",
    "sender",
    "from_address",
    "delegator_address",
    "depositor",
    "proposer",
    "voter",
    "granter",
    "owner",
];

/// Address that paid the fee: the explicit payer when set, otherwise the first
/// signer's key, otherwise the first message's signer. `None` when nothing is
/// derivable; the tx is still indexed without a signer.
pub fn fee_payer(prefix: &str, tx: &MergedTx) -> Option<String> {
    let payer = tx.tx.auth_info.fee.payer.trim();
    if !payer.is_empty() {
        return Some(payer.to_lowercase());
    }

    let key = tx
        .tx
        .auth_info
        .signer_infos
        .first()
        .and_then(|s| s.public_key.as_ref());
    match key {
        Some(key) => match address_from_public_key(prefix, key) {
            Ok(address) => Some(address),
            Err(e) => {
                warn!(
                    "[Tx: {}] Could not derive signer address: {:#}",
                    tx.response.txhash, e
                );
                None
            }
        },
        None => first_message_signer(tx),
    }
}

fn first_message_signer(tx: &MergedTx) -> Option<String> {
    let msg = tx.tx.body.messages.first()?;
    MESSAGE_SIGNER_FIELDS
        .iter()
        .filter_map(|field| msg.get(*field).and_then(Value::as_str))
        .find(|value| !value.is_empty())
        .map(str::to_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc_client::types::{AuthInfo, Fee, SignerInfo, Tx};
    use serde_json::json;

    // Generator point G, compressed.
    const G_COMPRESSED: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    fn g_key_json() -> Value {
        let bytes = hex::decode(G_COMPRESSED).unwrap();
        json!({"@type": SECP256K1_KEY, "key": STANDARD.encode(bytes)})
    }

    #[test]
    fn derives_secp256k1_address() {
        let addr = address_from_public_key("cosmos", &g_key_json()).unwrap();
        let expected_bytes =
            hash160::Hash::hash(&hex::decode(G_COMPRESSED).unwrap()).to_byte_array();
        assert_eq!(addr, bech32_address("cosmos", &expected_bytes).unwrap());
        assert!(addr.starts_with("cosmos1"));
    }

    #[test]
    fn multisig_uses_first_member() {
        let multisig = json!({
            "@type": MULTISIG_KEY,
            "threshold": 1,
            "public_keys": [g_key_json()]
        });
        assert_eq!(
            address_from_public_key("osmo", &multisig).unwrap(),
            address_from_public_key("osmo", &g_key_json()).unwrap()
        );
    }

    #[test]
    fn rejects_garbage_key() {
        let bad = json!({"@type": SECP256K1_KEY, "key": "AAAA"});
        assert!(address_from_public_key("osmo", &bad).is_err());
    }

    #[test]
    fn module_address_keeps_prefix() {
        let addr = module_address("osmo", "distribution").unwrap();
        assert!(addr.starts_with("osmo1"));
        assert_eq!(address_prefix(&addr).as_deref(), Some("osmo"));
        assert_eq!(address_prefix("not-an-address"), None);
    }

    #[test]
    fn explicit_payer_wins() {
        let tx = MergedTx {
            tx: Tx {
                auth_info: AuthInfo {
                    signer_infos: vec![SignerInfo {
                        public_key: Some(g_key_json()),
                    }],
                    fee: Fee {
                        payer: "OSMO1FEEPAYER".into(),
                        ..Default::default()
                    },
                },
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(fee_payer("osmo", &tx).as_deref(), Some("osmo1feepayer"));

        let mut unsigned = tx.clone();
        unsigned.tx.auth_info.fee.payer.clear();
        unsigned.tx.auth_info.signer_infos.clear();
        assert_eq!(fee_payer("osmo", &unsigned), None);
    }

    #[test]
    fn missing_key_falls_back_to_message_signer() {
        let mut tx = MergedTx::default();
        tx.tx.auth_info.signer_infos = vec![SignerInfo { public_key: None }];
        tx.tx.body.messages = vec![json!({
            "@type": "/cosmos.bank.v1beta1.MsgSend",
            "from_address": "OSMO1SENDER",
            "to_address": "osmo1receiver"
        })];
        assert_eq!(fee_payer("osmo", &tx).as_deref(), Some("osmo1sender"));
    }

    #[test]
    fn unsupported_key_leaves_payer_unknown() {
        let mut tx = MergedTx::default();
        tx.tx.auth_info.signer_infos = vec![SignerInfo {
            public_key: Some(json!({
                "@type": "/ethermint.crypto.v1.ethsecp256k1.PubKey",
                "key": STANDARD.encode(hex::decode(G_COMPRESSED).unwrap())
            })),
        }];
        assert_eq!(fee_payer("evmos", &tx), None);
    }
}
