// ----- standard library imports
// ----- extra library imports
use thiserror::Error;
// ----- local imports

// ----- end imports

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // ----- validation
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("invalid mint url: {0}")]
    InvalidMintUrl(String),
    #[error("invalid hex string: {0}")]
    InvalidHexString(String),
    #[error("invalid token format")]
    InvalidTokenFormat,
    #[error("invalid keyset id: {0}")]
    InvalidKeysetId(String),
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("invalid proof set: {0}")]
    InvalidProofSet(String),

    // ----- state
    #[error("wallet not initialized")]
    WalletNotInitialized,
    #[error("wallet already initialized")]
    WalletAlreadyInitialized,
    #[error("no active keyset for requested unit")]
    NoActiveKeyset,
    #[error("no spendable proofs")]
    NoSpendableProofs,
    #[error("balance insufficient")]
    BalanceInsufficient,
    #[error("proof already spent")]
    ProofAlreadySpent,
    #[error("invalid state: {0}")]
    InvalidState(String),

    // ----- quote
    #[error("quote expired")]
    QuoteExpired,
    #[error("quote pending")]
    QuotePending,
    #[error("quote already issued")]
    QuoteAlreadyIssued,
    #[error("quote not found")]
    QuoteNotFound,

    // ----- crypto
    #[error("hash to curve exhausted candidate counters")]
    HashToCurveExhausted,
    #[error("invalid point")]
    InvalidPoint,
    #[error("invalid scalar")]
    InvalidScalar,
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("dleq verification failed")]
    DLEQFailed,
    #[error("key generation failed")]
    KeyGenerationFailed,
    #[error("secp256k1 error: {0}")]
    Secp256k1(#[from] secp256k1::Error),
    #[error("bip39 error: {0}")]
    Bip39(#[from] bip39::Error),
    #[error("bitcoin bip32 error: {0}")]
    BtcBip32(#[from] bitcoin::bip32::Error),

    // ----- codec
    #[error("serialization failed: {0}")]
    SerializationFailed(String),
    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),
    #[error("unsupported token version")]
    UnsupportedVersion,

    // ----- storage
    #[error("store failed: {0}")]
    StoreFailed(String),
    #[error("retrieval failed: {0}")]
    RetrievalFailed(String),
    #[error("deletion failed: {0}")]
    DeletionFailed(String),
    #[error("invalid data in store")]
    InvalidData,

    // ----- mint
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("invalid mint configuration")]
    InvalidMintConfiguration,
    #[error("invalid response from mint")]
    InvalidResponse,
    #[error("mint http error {0}: {1}")]
    HttpError(u16, String),

    // ----- transport
    #[error("network error: {0}")]
    Network(String),
    #[error("operation timed out")]
    OperationTimeout,
    #[error("rate limited")]
    RateLimited,

    // ----- io / config
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
}
