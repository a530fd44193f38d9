//! Durable `redb`-backed implementations of the capability interfaces
//! `cashu-wallet-core` defines for proof and counter persistence, kept in
//! their own crate so a host application can opt into a storage engine
//! without pulling it into the cryptographic core (spec §9).

#[cfg(feature = "db-redb")]
pub mod redb_store;

#[cfg(feature = "db-redb")]
pub use redb_store::{RedbCounterStore, RedbProofStore};
