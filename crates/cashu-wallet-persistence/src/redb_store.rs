//! `redb`-backed `ProofStorage` and `KeysetCounterStorage`, generalizing
//! the reference wallet's `persistence::rexie::ProofDB` (one object store
//! per concern, keyed entries, read/write transactions) from IndexedDB to
//! an embedded on-disk table store (spec §4.3/§4.4 contract carried over
//! verbatim: the state machine and counter-monotonicity invariants are
//! identical, only the storage engine changes).
// ----- standard library imports
use std::path::Path;
// ----- extra library imports
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
// ----- local imports
use cashu_wallet_core::{
    counter_store::KeysetCounterStorage,
    error::{Error, Result},
    proof_store::{ProofKey, ProofStorage, proof_key},
    types::{KeysetId, Proof, ProofState},
};

// ----- end imports

const PROOFS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("proofs");
const COUNTERS_TABLE: TableDefinition<&str, u32> = TableDefinition::new("counters");

#[derive(Serialize, Deserialize)]
struct StoredProof {
    proof: Proof,
    state: ProofState,
}

fn encode_key(key: &ProofKey) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(key, &mut buf).map_err(|e| Error::SerializationFailed(e.to_string()))?;
    Ok(buf)
}

fn encode_value(v: &StoredProof) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(v, &mut buf).map_err(|e| Error::SerializationFailed(e.to_string()))?;
    Ok(buf)
}

fn decode_value(bytes: &[u8]) -> Result<StoredProof> {
    ciborium::from_reader(bytes).map_err(|e| Error::DeserializationFailed(e.to_string()))
}

/// `ProofStorage` over a `redb` table, one row per `(secret, signature_c)`
/// key holding the proof plus its lifecycle state (spec §4.4).
pub struct RedbProofStore {
    db: Database,
}

impl RedbProofStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path).map_err(|e| Error::StoreFailed(e.to_string()))?;
        let write_txn = db.begin_write().map_err(|e| Error::StoreFailed(e.to_string()))?;
        write_txn
            .open_table(PROOFS_TABLE)
            .map_err(|e| Error::StoreFailed(e.to_string()))?;
        write_txn.commit().map_err(|e| Error::StoreFailed(e.to_string()))?;
        Ok(Self { db })
    }
}

#[async_trait]
impl ProofStorage for RedbProofStore {
    async fn add_proofs(&self, proofs: Vec<Proof>) -> Result<()> {
        for p in &proofs {
            if p.amount == 0 || (p.amount & (p.amount - 1)) != 0 {
                return Err(Error::InvalidProofSet(format!("amount {} is not a power of two", p.amount)));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for p in &proofs {
            if !seen.insert(proof_key(p)) {
                return Err(Error::InvalidProofSet("duplicate proof in batch".into()));
            }
        }

        let write_txn = self.db.begin_write().map_err(|e| Error::StoreFailed(e.to_string()))?;
        {
            let mut table = write_txn.open_table(PROOFS_TABLE).map_err(|e| Error::StoreFailed(e.to_string()))?;
            for p in &proofs {
                let key = encode_key(&proof_key(p))?;
                if table.get(key.as_slice()).map_err(|e| Error::StoreFailed(e.to_string()))?.is_some() {
                    return Err(Error::InvalidProofSet(
                        "duplicate (secret, signature_c) already in store".into(),
                    ));
                }
            }
            for p in proofs {
                let key = encode_key(&proof_key(&p))?;
                let value = encode_value(&StoredProof { proof: p, state: ProofState::Available })?;
                table
                    .insert(key.as_slice(), value.as_slice())
                    .map_err(|e| Error::StoreFailed(e.to_string()))?;
            }
        }
        write_txn.commit().map_err(|e| Error::StoreFailed(e.to_string()))?;
        Ok(())
    }

    async fn available_by_keyset(&self, keyset_id: Option<KeysetId>) -> Result<Vec<Proof>> {
        let read_txn = self.db.begin_read().map_err(|e| Error::RetrievalFailed(e.to_string()))?;
        let table = read_txn.open_table(PROOFS_TABLE).map_err(|e| Error::RetrievalFailed(e.to_string()))?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(|e| Error::RetrievalFailed(e.to_string()))? {
            let (_, v) = entry.map_err(|e| Error::RetrievalFailed(e.to_string()))?;
            let stored = decode_value(v.value())?;
            if stored.state == ProofState::Available
                && keyset_id.is_none_or(|kid| stored.proof.keyset_id == kid)
            {
                out.push(stored.proof);
            }
        }
        out.sort_by(|a, b| proof_key(a).cmp(&proof_key(b)));
        Ok(out)
    }

    async fn mark_pending(&self, keys: &[ProofKey]) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(|e| Error::StoreFailed(e.to_string()))?;
        {
            let mut table = write_txn.open_table(PROOFS_TABLE).map_err(|e| Error::StoreFailed(e.to_string()))?;
            let mut updated = Vec::with_capacity(keys.len());
            for key in keys {
                let kb = encode_key(key)?;
                let raw = table.get(kb.as_slice()).map_err(|e| Error::StoreFailed(e.to_string()))?;
                let stored = match raw {
                    Some(v) => decode_value(v.value())?,
                    None => return Err(Error::ProofAlreadySpent),
                };
                if stored.state != ProofState::Available {
                    return Err(Error::InvalidState(
                        "proof is not Available and cannot be marked pending".into(),
                    ));
                }
                updated.push((kb, stored));
            }
            for (kb, mut stored) in updated {
                stored.state = ProofState::PendingSpent;
                let value = encode_value(&stored)?;
                table
                    .insert(kb.as_slice(), value.as_slice())
                    .map_err(|e| Error::StoreFailed(e.to_string()))?;
            }
        }
        write_txn.commit().map_err(|e| Error::StoreFailed(e.to_string()))?;
        Ok(())
    }

    async fn finalize_pending(&self, keys: &[ProofKey]) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(|e| Error::StoreFailed(e.to_string()))?;
        {
            let mut table = write_txn.open_table(PROOFS_TABLE).map_err(|e| Error::StoreFailed(e.to_string()))?;
            for key in keys {
                let kb = encode_key(key)?;
                if let Some(v) = table.get(kb.as_slice()).map_err(|e| Error::StoreFailed(e.to_string()))? {
                    let stored = decode_value(v.value())?;
                    if stored.state == ProofState::PendingSpent {
                        drop(v);
                        table.remove(kb.as_slice()).map_err(|e| Error::StoreFailed(e.to_string()))?;
                    }
                }
            }
        }
        write_txn.commit().map_err(|e| Error::StoreFailed(e.to_string()))?;
        Ok(())
    }

    async fn rollback_pending(&self, keys: &[ProofKey]) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(|e| Error::StoreFailed(e.to_string()))?;
        {
            let mut table = write_txn.open_table(PROOFS_TABLE).map_err(|e| Error::StoreFailed(e.to_string()))?;
            for key in keys {
                let kb = encode_key(key)?;
                let existing = table.get(kb.as_slice()).map_err(|e| Error::StoreFailed(e.to_string()))?;
                let mut stored = match existing {
                    Some(v) => decode_value(v.value())?,
                    None => continue,
                };
                if stored.state == ProofState::PendingSpent {
                    stored.state = ProofState::Available;
                    let value = encode_value(&stored)?;
                    table
                        .insert(kb.as_slice(), value.as_slice())
                        .map_err(|e| Error::StoreFailed(e.to_string()))?;
                }
            }
        }
        write_txn.commit().map_err(|e| Error::StoreFailed(e.to_string()))?;
        Ok(())
    }

    async fn remove(&self, keys: &[ProofKey]) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(|e| Error::StoreFailed(e.to_string()))?;
        {
            let mut table = write_txn.open_table(PROOFS_TABLE).map_err(|e| Error::StoreFailed(e.to_string()))?;
            for key in keys {
                let kb = encode_key(key)?;
                table.remove(kb.as_slice()).map_err(|e| Error::StoreFailed(e.to_string()))?;
            }
        }
        write_txn.commit().map_err(|e| Error::StoreFailed(e.to_string()))?;
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<Proof>> {
        let read_txn = self.db.begin_read().map_err(|e| Error::RetrievalFailed(e.to_string()))?;
        let table = read_txn.open_table(PROOFS_TABLE).map_err(|e| Error::RetrievalFailed(e.to_string()))?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(|e| Error::RetrievalFailed(e.to_string()))? {
            let (_, v) = entry.map_err(|e| Error::RetrievalFailed(e.to_string()))?;
            let stored = decode_value(v.value())?;
            if stored.state == ProofState::PendingSpent {
                out.push(stored.proof);
            }
        }
        Ok(out)
    }
}

/// `KeysetCounterStorage` over a `redb` table keyed by keyset id hex.
pub struct RedbCounterStore {
    db: Database,
}

impl RedbCounterStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path).map_err(|e| Error::StoreFailed(e.to_string()))?;
        let write_txn = db.begin_write().map_err(|e| Error::StoreFailed(e.to_string()))?;
        write_txn
            .open_table(COUNTERS_TABLE)
            .map_err(|e| Error::StoreFailed(e.to_string()))?;
        write_txn.commit().map_err(|e| Error::StoreFailed(e.to_string()))?;
        Ok(Self { db })
    }
}

#[async_trait]
impl KeysetCounterStorage for RedbCounterStore {
    async fn counter(&self, keyset_id: KeysetId) -> Result<u32> {
        let read_txn = self.db.begin_read().map_err(|e| Error::RetrievalFailed(e.to_string()))?;
        let table = read_txn.open_table(COUNTERS_TABLE).map_err(|e| Error::RetrievalFailed(e.to_string()))?;
        let hex = keyset_id.to_hex();
        Ok(table
            .get(hex.as_str())
            .map_err(|e| Error::RetrievalFailed(e.to_string()))?
            .map(|v| v.value())
            .unwrap_or(0))
    }

    async fn reserve(&self, keyset_id: KeysetId, n: u32) -> Result<u32> {
        let hex = keyset_id.to_hex();
        let write_txn = self.db.begin_write().map_err(|e| Error::StoreFailed(e.to_string()))?;
        let start = {
            let mut table = write_txn.open_table(COUNTERS_TABLE).map_err(|e| Error::StoreFailed(e.to_string()))?;
            let start = table
                .get(hex.as_str())
                .map_err(|e| Error::StoreFailed(e.to_string()))?
                .map(|v| v.value())
                .unwrap_or(0);
            table
                .insert(hex.as_str(), start + n)
                .map_err(|e| Error::StoreFailed(e.to_string()))?;
            start
        };
        write_txn.commit().map_err(|e| Error::StoreFailed(e.to_string()))?;
        Ok(start)
    }

    async fn advance_to_at_least(&self, keyset_id: KeysetId, min_value: u32) -> Result<()> {
        let hex = keyset_id.to_hex();
        let write_txn = self.db.begin_write().map_err(|e| Error::StoreFailed(e.to_string()))?;
        {
            let mut table = write_txn.open_table(COUNTERS_TABLE).map_err(|e| Error::StoreFailed(e.to_string()))?;
            let current = table
                .get(hex.as_str())
                .map_err(|e| Error::StoreFailed(e.to_string()))?
                .map(|v| v.value())
                .unwrap_or(0);
            if current < min_value {
                table
                    .insert(hex.as_str(), min_value)
                    .map_err(|e| Error::StoreFailed(e.to_string()))?;
            }
        }
        write_txn.commit().map_err(|e| Error::StoreFailed(e.to_string()))?;
        Ok(())
    }
}
