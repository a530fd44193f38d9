//! C4 — proof model and concurrency-safe lifecycle state machine
//! (spec §4.4): Available -> PendingSpent -> {Spent(removed) | Available}.
// ----- standard library imports
use std::collections::HashMap;
use std::sync::Mutex;
// ----- extra library imports
use async_trait::async_trait;
// ----- local imports
use crate::{
    error::{Error, Result},
    types::{CompressedPoint, KeysetId, Proof, ProofState},
};

// ----- end imports

/// Identity key for a proof in the store: (secret, signature_c).
pub type ProofKey = (String, CompressedPoint);

pub fn proof_key(p: &Proof) -> ProofKey {
    (p.secret.clone(), p.signature_c)
}

/// Narrow capability interface the wallet orchestrator uses for proof
/// persistence (spec §9: no inheritance, capability interfaces instead).
/// All operations are atomic with respect to each other — implementations
/// must serialize mutations behind a single lock per wallet.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProofStorage: Send + Sync {
    /// Validates well-formedness, rejects duplicate (secret, signature_c)
    /// pairs, inserts all as Available. All-or-nothing: a partial failure
    /// mutates nothing.
    async fn add_proofs(&self, proofs: Vec<Proof>) -> Result<()>;

    /// Available proofs, optionally filtered to one keyset.
    async fn available_by_keyset(&self, keyset_id: Option<KeysetId>) -> Result<Vec<Proof>>;

    /// Available -> PendingSpent. Fails (mutating nothing) if any key is
    /// not currently Available.
    async fn mark_pending(&self, keys: &[ProofKey]) -> Result<()>;

    /// PendingSpent -> Spent, then removed. Idempotent: spent/removed keys
    /// are silently skipped.
    async fn finalize_pending(&self, keys: &[ProofKey]) -> Result<()>;

    /// PendingSpent -> Available. Idempotent.
    async fn rollback_pending(&self, keys: &[ProofKey]) -> Result<()>;

    /// Unconditional removal, for any state.
    async fn remove(&self, keys: &[ProofKey]) -> Result<()>;

    /// All proofs currently PendingSpent, for crash recovery.
    async fn pending(&self) -> Result<Vec<Proof>>;

    /// Sum of amounts over Available ∪ PendingSpent.
    async fn balance(&self) -> Result<u64> {
        let available = self.available_by_keyset(None).await?;
        let pending = self.pending().await?;
        Ok(available.iter().chain(pending.iter()).map(|p| p.amount).sum())
    }
}

struct Entry {
    proof: Proof,
    state: ProofState,
}

/// In-memory `ProofStorage`, guarded by a single mutex — the actor-level
/// critical section the wallet orchestrator (C8) already enforces makes a
/// coarse lock sufficient (spec §5).
#[derive(Default)]
pub struct InMemoryProofStore {
    proofs: Mutex<HashMap<ProofKey, Entry>>,
}

impl InMemoryProofStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProofStorage for InMemoryProofStore {
    async fn add_proofs(&self, proofs: Vec<Proof>) -> Result<()> {
        for p in &proofs {
            if p.amount == 0 || (p.amount & (p.amount - 1)) != 0 {
                return Err(Error::InvalidProofSet(format!(
                    "amount {} is not a power of two",
                    p.amount
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for p in &proofs {
            if !seen.insert(proof_key(p)) {
                return Err(Error::InvalidProofSet("duplicate proof in batch".into()));
            }
        }
        let mut store = self.proofs.lock().expect("proof store mutex poisoned");
        for p in &proofs {
            if store.contains_key(&proof_key(p)) {
                return Err(Error::InvalidProofSet(
                    "duplicate (secret, signature_c) already in store".into(),
                ));
            }
        }
        for p in proofs {
            let key = proof_key(&p);
            store.insert(
                key,
                Entry {
                    proof: p,
                    state: ProofState::Available,
                },
            );
        }
        Ok(())
    }

    async fn available_by_keyset(&self, keyset_id: Option<KeysetId>) -> Result<Vec<Proof>> {
        let store = self.proofs.lock().expect("proof store mutex poisoned");
        let mut out: Vec<Proof> = store
            .values()
            .filter(|e| e.state == ProofState::Available)
            .filter(|e| keyset_id.is_none_or(|kid| e.proof.keyset_id == kid))
            .map(|e| e.proof.clone())
            .collect();
        out.sort_by(|a, b| proof_key(a).cmp(&proof_key(b)));
        Ok(out)
    }

    async fn mark_pending(&self, keys: &[ProofKey]) -> Result<()> {
        let mut store = self.proofs.lock().expect("proof store mutex poisoned");
        for key in keys {
            match store.get(key) {
                Some(e) if e.state == ProofState::Available => {}
                Some(_) => {
                    return Err(Error::InvalidState(
                        "proof is not Available and cannot be marked pending".into(),
                    ));
                }
                None => return Err(Error::ProofAlreadySpent),
            }
        }
        for key in keys {
            store.get_mut(key).expect("checked above").state = ProofState::PendingSpent;
        }
        Ok(())
    }

    async fn finalize_pending(&self, keys: &[ProofKey]) -> Result<()> {
        let mut store = self.proofs.lock().expect("proof store mutex poisoned");
        for key in keys {
            if let Some(e) = store.get(key) {
                if e.state == ProofState::PendingSpent {
                    store.remove(key);
                }
            }
        }
        Ok(())
    }

    async fn rollback_pending(&self, keys: &[ProofKey]) -> Result<()> {
        let mut store = self.proofs.lock().expect("proof store mutex poisoned");
        for key in keys {
            if let Some(e) = store.get_mut(key) {
                if e.state == ProofState::PendingSpent {
                    e.state = ProofState::Available;
                }
            }
        }
        Ok(())
    }

    async fn remove(&self, keys: &[ProofKey]) -> Result<()> {
        let mut store = self.proofs.lock().expect("proof store mutex poisoned");
        for key in keys {
            store.remove(key);
        }
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<Proof>> {
        let store = self.proofs.lock().expect("proof store mutex poisoned");
        Ok(store
            .values()
            .filter(|e| e.state == ProofState::PendingSpent)
            .map(|e| e.proof.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CompressedPoint;

    fn proof(secret: &str, amount: u64) -> Proof {
        let sk = secp256k1::SecretKey::from_slice(&crate::crypto::sha256(secret.as_bytes())).unwrap();
        let pk = crate::crypto::point_mul_generator(&sk);
        Proof {
            amount,
            keyset_id: crate::types::KeysetId::from_hex("00ad268c4d1f5826").unwrap(),
            secret: secret.to_string(),
            signature_c: CompressedPoint::from_public_key(&pk),
            witness: None,
            dleq: None,
        }
    }

    #[tokio::test]
    async fn add_then_available_then_balance() {
        let store = InMemoryProofStore::new();
        store
            .add_proofs(vec![proof("a", 2), proof("b", 8)])
            .await
            .unwrap();
        let available = store.available_by_keyset(None).await.unwrap();
        assert_eq!(available.len(), 2);
        assert_eq!(store.balance().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn add_proofs_rejects_duplicate_within_batch() {
        let store = InMemoryProofStore::new();
        let p = proof("dup", 4);
        let err = store.add_proofs(vec![p.clone(), p]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidProofSet(_)));
    }

    #[tokio::test]
    async fn add_proofs_rejects_non_power_of_two() {
        let store = InMemoryProofStore::new();
        let err = store.add_proofs(vec![proof("x", 3)]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidProofSet(_)));
    }

    #[tokio::test]
    async fn mark_pending_hides_from_available_and_rolls_back() {
        let store = InMemoryProofStore::new();
        let p = proof("a", 2);
        let key = proof_key(&p);
        store.add_proofs(vec![p]).await.unwrap();
        store.mark_pending(&[key.clone()]).await.unwrap();
        assert!(store.available_by_keyset(None).await.unwrap().is_empty());
        assert_eq!(store.pending().await.unwrap().len(), 1);

        store.rollback_pending(&[key]).await.unwrap();
        assert_eq!(store.available_by_keyset(None).await.unwrap().len(), 1);
        assert!(store.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn finalize_pending_removes_permanently() {
        let store = InMemoryProofStore::new();
        let p = proof("a", 2);
        let key = proof_key(&p);
        store.add_proofs(vec![p]).await.unwrap();
        store.mark_pending(&[key.clone()]).await.unwrap();
        store.finalize_pending(&[key.clone()]).await.unwrap();
        assert_eq!(store.balance().await.unwrap(), 0);
        // idempotent: calling again is a no-op, not an error
        store.finalize_pending(&[key]).await.unwrap();
    }

    #[tokio::test]
    async fn mark_pending_fails_if_not_available() {
        let store = InMemoryProofStore::new();
        let p = proof("a", 2);
        let key = proof_key(&p);
        store.add_proofs(vec![p]).await.unwrap();
        store.mark_pending(&[key.clone()]).await.unwrap();
        // already pending, mark_pending again should fail and not panic
        assert!(store.mark_pending(&[key]).await.is_err());
    }

    #[tokio::test]
    async fn no_resurrection_after_finalize() {
        let store = InMemoryProofStore::new();
        let p = proof("a", 2);
        let key = proof_key(&p);
        store.add_proofs(vec![p]).await.unwrap();
        store.mark_pending(&[key.clone()]).await.unwrap();
        store.finalize_pending(&[key.clone()]).await.unwrap();
        store.rollback_pending(&[key]).await.unwrap();
        assert!(store.available_by_keyset(None).await.unwrap().is_empty());
    }
}
