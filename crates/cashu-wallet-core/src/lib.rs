//! Core of a Cashu ecash client wallet: the BDHKE cryptographic engine,
//! proof lifecycle state machine, deterministic secret derivation,
//! encrypted secret store, token wire codec and the orchestrator tying
//! them together against an abstracted mint client.

pub mod bdhke;
pub mod config;
pub mod counter_store;
pub mod crypto;
pub mod derivation;
pub mod error;
pub mod http_mint_client;
#[cfg(feature = "keychain")]
pub mod keychain_store;
pub mod mint_client;
pub mod proof_store;
pub mod secure_store;
pub mod selection;
pub mod token;
pub mod types;
pub mod wallet;

pub use error::{Error, Result};
