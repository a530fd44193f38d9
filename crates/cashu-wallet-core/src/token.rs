//! C6 — token wire codec: V3 (JSON+base64url) and V4 (CBOR+base64url)
//! envelopes (spec §4.6).
// ----- standard library imports
use std::collections::{BTreeMap, HashSet};
// ----- extra library imports
use bitcoin::base64::Engine;
use bitcoin::base64::alphabet;
use bitcoin::base64::engine::{GeneralPurpose, GeneralPurposeConfig, general_purpose};
use serde::{Deserialize, Serialize};
// ----- local imports
use crate::{
    error::{Error, Result},
    types::{CashuToken, CompressedPoint, KeysetId, Proof, TokenEntry, Witness},
};

// ----- end imports

const V3_PREFIX: &str = "cashuA";
const V4_PREFIX: &str = "cashuB";

fn b64_engine() -> GeneralPurpose {
    let config =
        GeneralPurposeConfig::new().with_decode_padding_mode(bitcoin::base64::engine::DecodePaddingMode::Indifferent);
    GeneralPurpose::new(&alphabet::URL_SAFE, config)
}

// ----- V3 wire shapes (JSON, field names are part of the NUT-00 wire format)

#[derive(Serialize, Deserialize)]
struct V3Proof {
    amount: u64,
    id: String,
    secret: String,
    #[serde(rename = "C")]
    c: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    witness: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct V3Entry {
    mint: String,
    proofs: Vec<V3Proof>,
}

#[derive(Serialize, Deserialize)]
struct V3Wire {
    token: Vec<V3Entry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    memo: Option<String>,
}

// ----- V4 wire shapes (CBOR, short keys per NUT-00)

#[derive(Serialize, Deserialize)]
struct V4Proof {
    a: u64,
    #[serde(with = "serde_bytes")]
    s: Vec<u8>,
    #[serde(with = "serde_bytes", rename = "c")]
    sig: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct V4KeysetGroup {
    #[serde(with = "serde_bytes", rename = "i")]
    keyset_id: Vec<u8>,
    p: Vec<V4Proof>,
}

#[derive(Serialize, Deserialize)]
struct V4Wire {
    #[serde(rename = "m")]
    mint_url: String,
    #[serde(rename = "u")]
    unit: String,
    #[serde(rename = "d", skip_serializing_if = "Option::is_none")]
    memo: Option<String>,
    #[serde(rename = "t")]
    groups: Vec<V4KeysetGroup>,
}

/// Minimal stand-in for the `serde_bytes` crate: (de)serializes a `Vec<u8>`
/// as a CBOR/JSON byte string rather than as a sequence of integers.
mod serde_bytes {
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    struct BytesVisitor;

    impl<'de> serde::de::Visitor<'de> for BytesVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a byte string")
        }

        fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> std::result::Result<Vec<u8>, E> {
            Ok(v.to_vec())
        }

        fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> std::result::Result<Vec<u8>, E> {
            Ok(v)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<u8>, D::Error> {
        d.deserialize_bytes(BytesVisitor)
    }
}

fn validate_token(token: &CashuToken) -> Result<()> {
    if token.entries.is_empty() {
        return Err(Error::InvalidTokenFormat);
    }
    let mut seen = HashSet::new();
    let mut total: u128 = 0;
    for entry in &token.entries {
        if entry.proofs.is_empty() {
            return Err(Error::InvalidTokenFormat);
        }
        for p in &entry.proofs {
            if p.amount == 0 || p.secret.is_empty() {
                return Err(Error::InvalidTokenFormat);
            }
            if !seen.insert((p.secret.clone(), p.signature_c)) {
                return Err(Error::InvalidTokenFormat);
            }
            total += p.amount as u128;
        }
    }
    if total >= 1u128 << 63 {
        return Err(Error::InvalidTokenFormat);
    }
    Ok(())
}

/// Serializes `token` in the requested wire version with its `cashu{A|B}`
/// prefix (and, if `uri_scheme`, the optional `cashu:` URI prefix).
pub fn serialize(token: &CashuToken, version: TokenVersion, uri_scheme: bool) -> Result<String> {
    validate_token(token)?;
    let body = match version {
        TokenVersion::V3 => serialize_v3(token)?,
        TokenVersion::V4 => serialize_v4(token)?,
    };
    Ok(if uri_scheme {
        format!("cashu:{body}")
    } else {
        body
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenVersion {
    V3,
    V4,
}

fn serialize_v3(token: &CashuToken) -> Result<String> {
    let wire = V3Wire {
        token: token
            .entries
            .iter()
            .map(|e| V3Entry {
                mint: e.mint_url.clone(),
                proofs: e
                    .proofs
                    .iter()
                    .map(|p| V3Proof {
                        amount: p.amount,
                        id: p.keyset_id.to_hex(),
                        secret: p.secret.clone(),
                        c: p.signature_c.to_hex(),
                        witness: p.witness.as_ref().map(|w| {
                            serde_json::to_string(w).unwrap_or_default()
                        }),
                    })
                    .collect(),
            })
            .collect(),
        unit: token.unit.clone(),
        memo: token.memo.clone(),
    };
    let json = serde_json::to_vec(&wire).map_err(|e| Error::SerializationFailed(e.to_string()))?;
    let encoded = b64_engine().encode(json);
    Ok(format!("{V3_PREFIX}{encoded}"))
}

/// Groups proofs by keyset_id (stable sort) for the V4 wire shape.
fn serialize_v4(token: &CashuToken) -> Result<String> {
    if token.entries.len() != 1 {
        return Err(Error::SerializationFailed(
            "V4 tokens carry exactly one mint entry".into(),
        ));
    }
    let entry = &token.entries[0];
    let mut by_keyset: BTreeMap<KeysetId, Vec<V4Proof>> = BTreeMap::new();
    for p in &entry.proofs {
        by_keyset.entry(p.keyset_id).or_default().push(V4Proof {
            a: p.amount,
            s: p.secret.clone().into_bytes(),
            sig: p.signature_c.0.to_vec(),
        });
    }
    let groups = by_keyset
        .into_iter()
        .map(|(kid, p)| V4KeysetGroup {
            keyset_id: kid.0.to_vec(),
            p,
        })
        .collect();
    let wire = V4Wire {
        mint_url: entry.mint_url.clone(),
        unit: token.unit.clone().unwrap_or_else(|| "sat".to_string()),
        memo: token.memo.clone(),
        groups,
    };
    let mut bytes = Vec::new();
    ciborium::into_writer(&wire, &mut bytes).map_err(|e| Error::SerializationFailed(e.to_string()))?;
    let encoded = b64_engine().encode(bytes);
    Ok(format!("{V4_PREFIX}{encoded}"))
}

/// Auto-detects V3 vs V4 by the third character of the string (after
/// stripping an optional `cashu:` URI prefix) and parses + validates.
pub fn deserialize(s: &str) -> Result<CashuToken> {
    let s = s.strip_prefix("cashu:").unwrap_or(s);
    if let Some(rest) = s.strip_prefix(V3_PREFIX) {
        let token = deserialize_v3_body(rest)?;
        validate_token(&token)?;
        Ok(token)
    } else if let Some(rest) = s.strip_prefix(V4_PREFIX) {
        let token = deserialize_v4_body(rest)?;
        validate_token(&token)?;
        Ok(token)
    } else {
        Err(Error::InvalidTokenFormat)
    }
}

fn deserialize_v3_body(body: &str) -> Result<CashuToken> {
    let decoded = b64_engine()
        .decode(body)
        .map_err(|e| Error::DeserializationFailed(e.to_string()))?;
    let wire: V3Wire =
        serde_json::from_slice(&decoded).map_err(|e| Error::DeserializationFailed(e.to_string()))?;
    let entries = wire
        .token
        .into_iter()
        .map(|e| -> Result<TokenEntry> {
            let proofs = e
                .proofs
                .into_iter()
                .map(|p| -> Result<Proof> {
                    Ok(Proof {
                        amount: p.amount,
                        keyset_id: KeysetId::from_hex(&p.id)?,
                        secret: p.secret,
                        signature_c: CompressedPoint::from_hex(&p.c)?,
                        witness: p
                            .witness
                            .and_then(|w| serde_json::from_str::<Witness>(&w).ok()),
                        dleq: None,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(TokenEntry {
                mint_url: e.mint,
                proofs,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(CashuToken {
        entries,
        unit: wire.unit,
        memo: wire.memo,
    })
}

fn deserialize_v4_body(body: &str) -> Result<CashuToken> {
    let decoded = b64_engine()
        .decode(body)
        .map_err(|e| Error::DeserializationFailed(e.to_string()))?;
    let wire: V4Wire =
        ciborium::from_reader(&decoded[..]).map_err(|e| Error::DeserializationFailed(e.to_string()))?;
    let mut proofs = Vec::new();
    for group in wire.groups {
        let keyset_id = KeysetId(
            group
                .keyset_id
                .try_into()
                .map_err(|_| Error::InvalidKeysetId("v4 keyset id must be 8 bytes".into()))?,
        );
        for p in group.p {
            let secret = String::from_utf8(p.s).map_err(|e| Error::DeserializationFailed(e.to_string()))?;
            let signature_c_bytes: [u8; 33] = p
                .sig
                .try_into()
                .map_err(|_| Error::InvalidPoint)?;
            crate::crypto::point_from_compressed(&signature_c_bytes)?;
            proofs.push(Proof {
                amount: p.a,
                keyset_id,
                secret,
                signature_c: CompressedPoint(signature_c_bytes),
                witness: None,
                dleq: None,
            });
        }
    }
    Ok(CashuToken {
        entries: vec![TokenEntry {
            mint_url: wire.mint_url,
            proofs,
        }],
        unit: Some(wire.unit),
        memo: wire.memo,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_proof(secret: &str, amount: u64) -> Proof {
        let sk = secp256k1::SecretKey::from_slice(&crate::crypto::sha256(secret.as_bytes())).unwrap();
        let pk = crate::crypto::point_mul_generator(&sk);
        Proof {
            amount,
            keyset_id: KeysetId::from_hex("00ad268c4d1f5826").unwrap(),
            secret: secret.to_string(),
            signature_c: CompressedPoint::from_public_key(&pk),
            witness: None,
            dleq: None,
        }
    }

    fn sample_token() -> CashuToken {
        CashuToken {
            entries: vec![TokenEntry {
                mint_url: "https://m.example".to_string(),
                proofs: vec![sample_proof("9a6dbb847bd232ba76", 8)],
            }],
            unit: Some("sat".to_string()),
            memo: None,
        }
    }

    #[test]
    fn v3_round_trips() {
        let t = sample_token();
        let s = serialize(&t, TokenVersion::V3, false).unwrap();
        assert!(s.starts_with("cashuA"));
        let back = deserialize(&s).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn v4_round_trips() {
        let t = sample_token();
        let s = serialize(&t, TokenVersion::V4, false).unwrap();
        assert!(s.starts_with("cashuB"));
        let back = deserialize(&s).unwrap();
        assert_eq!(back.total_amount(), t.total_amount());
        assert_eq!(back.entries[0].mint_url, t.entries[0].mint_url);
    }

    #[test]
    fn auto_detect_by_third_character() {
        let t = sample_token();
        let v3 = serialize(&t, TokenVersion::V3, false).unwrap();
        let v4 = serialize(&t, TokenVersion::V4, false).unwrap();
        assert!(deserialize(&v3).is_ok());
        assert!(deserialize(&v4).is_ok());
    }

    #[test]
    fn uri_scheme_prefix_is_optional_and_stripped() {
        let t = sample_token();
        let s = serialize(&t, TokenVersion::V3, true).unwrap();
        assert!(s.starts_with("cashu:cashuA"));
        let back = deserialize(&s).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn invalid_prefix_rejected() {
        assert!(matches!(deserialize("notatoken"), Err(Error::InvalidTokenFormat)));
        assert!(matches!(deserialize("cashuCxxxx"), Err(Error::InvalidTokenFormat)));
    }

    #[test]
    fn rejects_duplicate_proofs_across_token() {
        let p = sample_proof("dup-secret", 4);
        let t = CashuToken {
            entries: vec![TokenEntry {
                mint_url: "https://m.example".to_string(),
                proofs: vec![p.clone(), p],
            }],
            unit: None,
            memo: None,
        };
        assert!(serialize(&t, TokenVersion::V3, false).is_err());
    }

    #[test]
    fn amount_conservation_holds() {
        let t = CashuToken {
            entries: vec![TokenEntry {
                mint_url: "https://m.example".to_string(),
                proofs: vec![sample_proof("a", 2), sample_proof("b", 8), sample_proof("c", 16)],
            }],
            unit: None,
            memo: None,
        };
        assert_eq!(t.total_amount(), 26);
    }
}
