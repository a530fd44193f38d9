//! External interface the core consumes (spec §6): an abstract mint
//! client capability. Wire formats mirror NUTs 01-22; transport (HTTP,
//! retries, idempotency headers) is an external collaborator's concern —
//! the core only depends on this trait.
// ----- standard library imports
// ----- extra library imports
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
// ----- local imports
use crate::{
    error::Result,
    types::{BlindSignature, BlindedMessage, Keyset, KeysetId, MeltQuote, MintProofState, MintQuote, Proof},
};

// ----- end imports

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintInfo {
    pub name: String,
    pub pubkey: Option<String>,
    pub nuts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapRequest {
    pub inputs: Vec<Proof>,
    pub outputs: Vec<BlindedMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapResponse {
    pub signatures: Vec<BlindSignature>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintRequest {
    pub quote: String,
    pub outputs: Vec<BlindedMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintResponse {
    pub signatures: Vec<BlindSignature>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeltRequest {
    pub quote: String,
    pub inputs: Vec<Proof>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<BlindedMessage>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeltResponse {
    pub state: MintProofState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change: Option<Vec<BlindSignature>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckStateRequest {
    /// Hex-encoded `Y = hashToCurve(secret)` per proof being queried.
    pub ys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofStateEntry {
    pub y: String,
    pub state: MintProofState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckStateResponse {
    pub states: Vec<ProofStateEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub outputs: Vec<BlindedMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreResponse {
    pub outputs: Vec<BlindedMessage>,
    pub signatures: Vec<BlindSignature>,
}

/// The mint I/O capability the wallet orchestrator depends on. Dynamic
/// dispatch is acceptable here (spec §9) — the cost is negligible against
/// network latency. All POSTs that create state should carry an
/// idempotency key at the transport layer; that concern lives with the
/// concrete implementation, not this trait.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MintClient: Send + Sync {
    async fn get_info(&self) -> Result<MintInfo>;
    async fn get_keys(&self, keyset_id: Option<KeysetId>) -> Result<Vec<Keyset>>;
    async fn get_keysets(&self) -> Result<Vec<Keyset>>;

    async fn request_mint_quote(&self, amount: u64, unit: &str, method: &str) -> Result<MintQuote>;
    async fn get_mint_quote(&self, method: &str, quote_id: &str) -> Result<MintQuote>;
    async fn mint(&self, method: &str, request: MintRequest) -> Result<MintResponse>;

    async fn request_melt_quote(&self, request: &str, unit: &str, method: &str) -> Result<MeltQuote>;
    async fn get_melt_quote(&self, method: &str, quote_id: &str) -> Result<MeltQuote>;
    async fn melt(&self, method: &str, request: MeltRequest) -> Result<MeltResponse>;

    async fn swap(&self, request: SwapRequest) -> Result<SwapResponse>;
    async fn check_state(&self, request: CheckStateRequest) -> Result<CheckStateResponse>;
    async fn restore(&self, request: RestoreRequest) -> Result<RestoreResponse>;
}
