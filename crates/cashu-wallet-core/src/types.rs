//! Core data model shared by the BDHKE engine, proof store, selection
//! engine, token codec and wallet orchestrator (see spec §3).
// ----- standard library imports
use std::collections::BTreeMap;
// ----- extra library imports
use serde::{Deserialize, Deserializer, Serialize};
use zeroize::Zeroize;
// ----- local imports
use crate::error::{Error, Result};

// ----- end imports

/// 16-hex-character keyset identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeysetId(#[serde(with = "keyset_id_hex")] pub [u8; 8]);

impl KeysetId {
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != 16 {
            return Err(Error::InvalidKeysetId(s.to_string()));
        }
        let bytes = hex::decode(s).map_err(|_| Error::InvalidKeysetId(s.to_string()))?;
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| Error::InvalidKeysetId(s.to_string()))?;
        Ok(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// `keyset_int = truncate_to_31_bits(u64_be(hex_decode(keyset_id)))`, per NUT-13.
    pub fn derivation_index(&self) -> u32 {
        let as_u64 = u64::from_be_bytes(self.0);
        (as_u64 % (1u64 << 31)) as u32
    }
}

impl std::fmt::Display for KeysetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

mod keyset_id_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 8], s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<[u8; 8], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("keyset id must be 8 bytes"))
    }
}

/// A compressed secp256k1 point, 33 bytes, serialized as lowercase hex on
/// the JSON (V3) wire and as raw bytes on the CBOR (V4) wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompressedPoint(pub [u8; 33]);

impl CompressedPoint {
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| Error::InvalidHexString(s.to_string()))?;
        let arr: [u8; 33] = bytes
            .try_into()
            .map_err(|_| Error::InvalidPoint)?;
        // validate it actually decompresses to a point on-curve
        crate::crypto::point_from_compressed(&arr)?;
        Ok(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_public_key(p: &secp256k1::PublicKey) -> Self {
        Self(p.serialize())
    }

    pub fn to_public_key(&self) -> Result<secp256k1::PublicKey> {
        crate::crypto::point_from_compressed(&self.0)
    }
}

impl Serialize for CompressedPoint {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CompressedPoint {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A DLEQ proof attached to a `BlindSignature`/`Proof` per NUT-12.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DleqProof {
    pub e: [u8; 32],
    pub s: [u8; 32],
    /// Only carried on `Proof` (not `BlindSignature`): the blinding factor
    /// the wallet used, needed to re-derive `C` from `C_` during verification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r: Option<[u8; 32]>,
}

/// A structured witness (P2PK signatures, HTLC preimage) carried by a proof
/// or blinded message when a spending condition applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub signatures: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preimage: Option<String>,
}

/// An ecash proof: bearer money. Identity is (secret, signature_c, keyset_id, amount).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub amount: u64,
    pub keyset_id: KeysetId,
    pub secret: String,
    #[serde(rename = "C")]
    pub signature_c: CompressedPoint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub witness: Option<Witness>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dleq: Option<DleqProof>,
}

impl Proof {
    /// `Y = hashToCurve(secret)`, used as the proof's identity hash for
    /// `check_state` and dedup.
    pub fn y(&self) -> Result<secp256k1::PublicKey> {
        crate::bdhke::hash_to_curve(self.secret.as_bytes())
    }

    pub fn identity(&self) -> (String, CompressedPoint) {
        (self.secret.clone(), self.signature_c)
    }
}

/// Outgoing blinded envelope, pre-signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlindedMessage {
    pub amount: u64,
    pub keyset_id: KeysetId,
    #[serde(rename = "B_")]
    pub blinded_point: CompressedPoint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub witness: Option<Witness>,
}

/// Mint's signature response over a `BlindedMessage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlindSignature {
    pub amount: u64,
    pub keyset_id: KeysetId,
    #[serde(rename = "C_")]
    pub blind_signature_c: CompressedPoint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dleq: Option<DleqProof>,
}

/// Ephemeral state held between blinding and unblinding. Never persisted;
/// the in-flight operation owns it exclusively and wipes it on completion.
#[derive(Clone)]
pub struct WalletBlindingData {
    pub secret: String,
    pub blinding_factor: secp256k1::SecretKey,
    pub blinded_point: secp256k1::PublicKey,
    pub amount: u64,
    pub keyset_id: KeysetId,
}

impl Drop for WalletBlindingData {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

/// Mint-published keyset: id, unit, active flag, optional fee and the
/// per-amount public keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keyset {
    pub id: KeysetId,
    pub unit: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_ppk: Option<u32>,
    pub keys: BTreeMap<u64, CompressedPoint>,
}

impl Keyset {
    pub fn key_for_amount(&self, amount: u64) -> Option<&CompressedPoint> {
        self.keys.get(&amount)
    }
}

/// One (mint_url, proofs) entry of a `CashuToken`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEntry {
    pub mint_url: String,
    pub proofs: Vec<Proof>,
}

/// Transport envelope: an ordered sequence of mint/proof groupings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashuToken {
    pub entries: Vec<TokenEntry>,
    pub unit: Option<String>,
    pub memo: Option<String>,
}

impl CashuToken {
    pub fn total_amount(&self) -> u64 {
        self.entries
            .iter()
            .flat_map(|e| e.proofs.iter())
            .map(|p| p.amount)
            .sum()
    }

    pub fn all_proofs(&self) -> impl Iterator<Item = &Proof> {
        self.entries.iter().flat_map(|e| e.proofs.iter())
    }
}

/// In-store lifecycle tag for a proof (see spec §4.4 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofState {
    Available,
    PendingSpent,
    Spent,
}

/// Mint-reported state of a proof returned from `check_state` (NUT-07).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MintProofState {
    Unspent,
    Pending,
    Spent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintQuote {
    pub quote_id: String,
    pub request: String,
    pub amount: u64,
    pub unit: String,
    pub paid: bool,
    pub expiry: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeltQuote {
    pub quote_id: String,
    pub amount: u64,
    pub fee_reserve: u64,
    pub unit: String,
    pub paid: bool,
    pub expiry: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeltState {
    Paid,
    Failed,
    Pending,
}
