//! C8 — the wallet orchestrator: glues the crypto, derivation, proof
//! store, selection and codec components into the public operations a
//! host application calls (spec §4.8).
// ----- standard library imports
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
// ----- extra library imports
use tokio::sync::Mutex as AsyncMutex;
// ----- local imports
use crate::{
    bdhke,
    config::Config,
    counter_store::KeysetCounterStorage,
    derivation,
    error::{Error, Result},
    mint_client::{self, MintClient},
    proof_store::{self, ProofStorage},
    secure_store::SecureStore,
    selection,
    token::{self, TokenVersion},
    types::{
        CashuToken, CompressedPoint, Keyset, KeysetId, MeltQuote, MeltState, MintProofState,
        MintQuote, Proof, TokenEntry, WalletBlindingData,
    },
};

// ----- end imports

/// Top-level wallet lifecycle state (spec §4.8 diagram).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletState {
    Uninitialized,
    Initializing,
    Ready,
    Syncing,
    Error(String),
}

/// Outcome of a `melt` call.
#[derive(Debug, Clone)]
pub struct MeltOutcome {
    pub state: MeltState,
    pub change_proofs: Vec<Proof>,
}

/// Glues C2-C7 behind the public operations. Owns the proof store and
/// counter store exclusively; the secure store owns secret material on
/// disk. Single-threaded-cooperative actor: `op_lock` serializes all
/// public operations so a proof store snapshot taken for selection is
/// never interleaved with another operation's `mark_pending` (spec §5).
pub struct Wallet {
    config: Config,
    mint_client: Arc<dyn MintClient>,
    proof_store: Arc<dyn ProofStorage>,
    counter_store: Arc<dyn KeysetCounterStorage>,
    secure_store: Arc<dyn SecureStore>,

    op_lock: AsyncMutex<()>,
    state: StdMutex<WalletState>,
    keysets: StdMutex<HashMap<KeysetId, Keyset>>,
    seed: StdMutex<Option<[u8; 64]>>,
}

impl Wallet {
    pub fn new(
        config: Config,
        mint_client: Arc<dyn MintClient>,
        proof_store: Arc<dyn ProofStorage>,
        counter_store: Arc<dyn KeysetCounterStorage>,
        secure_store: Arc<dyn SecureStore>,
    ) -> Self {
        Self {
            config,
            mint_client,
            proof_store,
            counter_store,
            secure_store,
            op_lock: AsyncMutex::new(()),
            state: StdMutex::new(WalletState::Uninitialized),
            keysets: StdMutex::new(HashMap::new()),
            seed: StdMutex::new(None),
        }
    }

    pub fn state(&self) -> WalletState {
        self.state.lock().expect("wallet state mutex poisoned").clone()
    }

    fn set_state(&self, s: WalletState) {
        *self.state.lock().expect("wallet state mutex poisoned") = s;
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            WalletState::Ready | WalletState::Syncing => Ok(()),
            _ => Err(Error::WalletNotInitialized),
        }
    }

    /// `Uninitialized -> Initializing -> Ready` (or `Error` on failure).
    /// Generates a fresh mnemonic if none is supplied, persists
    /// mnemonic+seed to the secure store, and fetches mint keysets.
    pub async fn initialize(&self, mnemonic_phrase: Option<String>, passphrase: Option<&str>) -> Result<()> {
        let span = tracing::info_span!("wallet.initialize", mint = %self.config.mint_url);
        let _enter = span.enter();
        let _guard = self.op_lock.lock().await;
        if self.state() != WalletState::Uninitialized {
            tracing::warn!("initialize called on an already-initialized wallet");
            return Err(Error::WalletAlreadyInitialized);
        }
        self.set_state(WalletState::Initializing);

        let result = self.initialize_inner(mnemonic_phrase, passphrase).await;
        match &result {
            Ok(()) => {
                tracing::info!("wallet ready");
                self.set_state(WalletState::Ready);
            }
            Err(e) => {
                tracing::error!(error = %e, "wallet initialization failed");
                self.set_state(WalletState::Error(e.to_string()));
            }
        }
        result
    }

    async fn initialize_inner(&self, mnemonic_phrase: Option<String>, passphrase: Option<&str>) -> Result<()> {
        let mnemonic = match mnemonic_phrase {
            Some(phrase) => derivation::parse_mnemonic(&phrase)?,
            None => derivation::generate_mnemonic(128)?,
        };
        let seed = derivation::seed_from_mnemonic(&mnemonic, passphrase.unwrap_or(""));

        self.secure_store.save_mnemonic(&mnemonic.to_string()).await?;
        self.secure_store.save_seed(&seed).await?;
        *self.seed.lock().expect("seed mutex poisoned") = Some(seed);

        self.refresh_keysets().await?;
        Ok(())
    }

    async fn refresh_keysets(&self) -> Result<()> {
        let fetched = self.mint_client.get_keysets().await?;
        let mut keysets = self.keysets.lock().expect("keysets mutex poisoned");
        keysets.clear();
        for ks in fetched {
            if ks.unit == self.config.unit {
                keysets.insert(ks.id, ks);
            }
        }
        Ok(())
    }

    /// `Ready -> Syncing -> Ready`: refreshes mint keyset info.
    pub async fn sync(&self) -> Result<()> {
        let _span = tracing::info_span!("wallet.sync").entered();
        let _guard = self.op_lock.lock().await;
        self.ensure_ready()?;
        self.set_state(WalletState::Syncing);
        let result = self.refresh_keysets().await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "keyset refresh failed");
        }
        self.set_state(WalletState::Ready);
        result
    }

    /// Resets to `Uninitialized`: wipes the secure store and in-memory
    /// caches. Does not touch the proof store (callers keep their ecash).
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        self.secure_store.delete_all().await?;
        *self.seed.lock().expect("seed mutex poisoned") = None;
        self.keysets.lock().expect("keysets mutex poisoned").clear();
        self.set_state(WalletState::Uninitialized);
        Ok(())
    }

    fn seed_copy(&self) -> Result<[u8; 64]> {
        self.seed
            .lock()
            .expect("seed mutex poisoned")
            .ok_or(Error::WalletNotInitialized)
    }

    fn active_keyset(&self) -> Result<Keyset> {
        let keysets = self.keysets.lock().expect("keysets mutex poisoned");
        keysets
            .values()
            .find(|ks| ks.active)
            .cloned()
            .ok_or(Error::NoActiveKeyset)
    }

    fn keyset_by_id(&self, id: KeysetId) -> Result<Keyset> {
        self.keysets
            .lock()
            .expect("keysets mutex poisoned")
            .get(&id)
            .cloned()
            .ok_or(Error::NoActiveKeyset)
    }

    pub async fn balance(&self) -> Result<u64> {
        self.ensure_ready()?;
        self.proof_store.balance().await
    }

    /// Derives `amounts.len()` fresh `(secret, r)` pairs for `keyset` at the
    /// next reserved counter values (NUT-13), blinding each into an outgoing
    /// envelope.
    async fn derive_outputs(&self, keyset: &Keyset, amounts: &[u64]) -> Result<Vec<WalletBlindingData>> {
        let seed = self.seed_copy()?;
        let start = self.counter_store.reserve(keyset.id, amounts.len() as u32).await?;
        let mut out = Vec::with_capacity(amounts.len());
        for (i, amount) in amounts.iter().enumerate() {
            let counter = start + i as u32;
            let derived = derivation::derive(&seed, keyset.id, counter)?;
            let y = bdhke::hash_to_curve(derived.secret.as_bytes())?;
            let r_g = crate::crypto::point_mul_generator(&derived.blinding_factor);
            let blinded_point = crate::crypto::point_add(&y, &r_g)?;
            out.push(WalletBlindingData {
                secret: derived.secret,
                blinding_factor: derived.blinding_factor,
                blinded_point,
                amount: *amount,
                keyset_id: keyset.id,
            });
        }
        Ok(out)
    }

    async fn unblind_all(
        &self,
        keyset: &Keyset,
        blinding: &[WalletBlindingData],
        signatures: &[crate::types::BlindSignature],
    ) -> Result<Vec<Proof>> {
        if blinding.len() != signatures.len() {
            return Err(Error::InvalidResponse);
        }
        let mut proofs = Vec::with_capacity(signatures.len());
        for (data, sig) in blinding.iter().zip(signatures.iter()) {
            let mint_key = keyset.key_for_amount(sig.amount).ok_or(Error::NoActiveKeyset)?;
            if let Some(dleq) = &sig.dleq {
                let y = bdhke::hash_to_curve(data.secret.as_bytes())?;
                bdhke::dleq_verify(mint_key, &y, &sig.blind_signature_c, dleq)?;
            }
            proofs.push(bdhke::unblind(sig, data, mint_key)?);
        }
        Ok(proofs)
    }

    /// Stateless with respect to proofs.
    pub async fn request_mint_quote(&self, amount: u64, method: &str) -> Result<MintQuote> {
        self.ensure_ready()?;
        self.mint_client
            .request_mint_quote(amount, &self.config.unit, method)
            .await
    }

    /// Mints `amount` against a paid `quote_id` (spec §4.8 `mint`).
    pub async fn mint(&self, quote_id: &str, amount: u64, method: &str) -> Result<Vec<Proof>> {
        let span = tracing::info_span!("wallet.mint", quote_id, amount);
        let _enter = span.enter();
        let _guard = self.op_lock.lock().await;
        self.ensure_ready()?;

        let quote = self.mint_client.get_mint_quote(method, quote_id).await?;
        if !quote.paid {
            tracing::debug!("mint quote not yet paid");
            return Err(Error::QuotePending);
        }

        let keyset = self.active_keyset()?;
        let outs = selection::split_amount(amount);
        let blinding = self.derive_outputs(&keyset, &outs).await?;
        let outputs: Vec<_> = blinding.iter().map(bdhke::blinded_message).collect();

        let response = self
            .mint_client
            .mint(method, mint_client::MintRequest { quote: quote_id.to_string(), outputs })
            .await?;
        if response.signatures.len() != blinding.len() {
            tracing::error!(
                expected = blinding.len(),
                got = response.signatures.len(),
                "mint returned a mismatched signature count"
            );
            return Err(Error::InvalidResponse);
        }
        let proofs = self.unblind_all(&keyset, &blinding, &response.signatures).await?;
        self.proof_store.add_proofs(proofs.clone()).await?;
        tracing::info!(proofs = proofs.len(), "mint complete");
        Ok(proofs)
    }

    /// Sends `amount` by swapping selected inputs for a fresh send-set
    /// plus change (spec §4.8 `send`).
    pub async fn send(&self, amount: u64, memo: Option<String>) -> Result<CashuToken> {
        let span = tracing::info_span!("wallet.send", amount);
        let _enter = span.enter();
        let _guard = self.op_lock.lock().await;
        self.ensure_ready()?;

        let keyset = self.active_keyset()?;
        let available = self.proof_store.available_by_keyset(None).await?;
        let selected = selection::select_proofs(&available, amount).inspect_err(|e| {
            tracing::warn!(error = %e, "input selection failed");
        })?;
        let keys: Vec<_> = selected.iter().map(proof_store::proof_key).collect();

        let sum: u64 = selected.iter().map(|p| p.amount).sum();
        let fee = selection::fee_for_inputs(selected.len(), keyset.fee_ppk.unwrap_or(0));
        let (send_shape, change_shape) = selection::plan_send_outputs(amount, sum, fee)?;
        let mut all_amounts = send_shape.clone();
        all_amounts.extend_from_slice(&change_shape);

        let blinding = self.derive_outputs(&keyset, &all_amounts).await?;
        let outputs: Vec<_> = blinding.iter().map(bdhke::blinded_message).collect();

        self.proof_store.mark_pending(&keys).await?;

        let swap_result = self
            .mint_client
            .swap(mint_client::SwapRequest { inputs: selected.clone(), outputs })
            .await;

        let response = match swap_result {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "swap failed, rolling back pending inputs");
                self.proof_store.rollback_pending(&keys).await?;
                return Err(e);
            }
        };

        let unblind_result = self.unblind_all(&keyset, &blinding, &response.signatures).await;
        let unblinded = match unblind_result {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "unblind/DLEQ verification failed, rolling back");
                self.proof_store.rollback_pending(&keys).await?;
                return Err(e);
            }
        };

        let (send_set, change_set) = match selection::partition_send_and_change(unblinded, &send_shape) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "mint returned denominations that don't match the requested shape");
                self.proof_store.rollback_pending(&keys).await?;
                return Err(e);
            }
        };

        self.proof_store.finalize_pending(&keys).await?;
        self.proof_store.add_proofs(change_set).await?;
        tracing::info!(sent = send_shape.len(), "send complete");

        Ok(CashuToken {
            entries: vec![TokenEntry {
                mint_url: self.config.mint_url.to_string().trim_end_matches('/').to_string(),
                proofs: send_set,
            }],
            unit: Some(self.config.unit.clone()),
            memo,
        })
    }

    /// Serializes a token with the given version/URI preference.
    pub fn encode_token(&self, token: &CashuToken, version: TokenVersion, uri_scheme: bool) -> Result<String> {
        token::serialize(token, version, uri_scheme)
    }

    pub fn decode_token(&self, s: &str) -> Result<CashuToken> {
        token::deserialize(s)
    }

    /// Receives a token: for each entry whose mint matches ours, swaps the
    /// inbound proofs for fresh outputs (invalidating the sender's copy)
    /// and stores the result. Any entry for a foreign mint rejects the
    /// whole token with no mutation (spec §4.8 `receive`, REDESIGN FLAG #4).
    pub async fn receive(&self, token: &CashuToken) -> Result<Vec<Proof>> {
        let _span = tracing::info_span!("wallet.receive", entries = token.entries.len()).entered();
        let _guard = self.op_lock.lock().await;
        self.ensure_ready()?;

        let our_mint = self.config.mint_url.to_string();
        let our_mint = our_mint.trim_end_matches('/');
        for entry in &token.entries {
            if entry.mint_url.trim_end_matches('/') != our_mint {
                tracing::warn!(mint = %entry.mint_url, "rejecting token with a foreign-mint entry");
                return Err(Error::InvalidMintConfiguration);
            }
        }

        let keyset = self.active_keyset()?;
        let mut received = Vec::new();
        for entry in &token.entries {
            let total: u64 = entry.proofs.iter().map(|p| p.amount).sum();
            let outs = selection::split_amount(total);
            let blinding = self.derive_outputs(&keyset, &outs).await?;
            let outputs: Vec<_> = blinding.iter().map(bdhke::blinded_message).collect();

            let response = self
                .mint_client
                .swap(mint_client::SwapRequest { inputs: entry.proofs.clone(), outputs })
                .await?;
            let proofs = self.unblind_all(&keyset, &blinding, &response.signatures).await?;
            self.proof_store.add_proofs(proofs.clone()).await?;
            received.extend(proofs);
        }
        tracing::info!(received = received.len(), "receive complete");
        Ok(received)
    }

    /// Pays `payment_request` via melt (spec §4.8 `melt`).
    pub async fn melt(&self, payment_request: &str, method: &str) -> Result<MeltOutcome> {
        let span = tracing::info_span!("wallet.melt");
        let _enter = span.enter();
        let _guard = self.op_lock.lock().await;
        self.ensure_ready()?;

        let keyset = self.active_keyset()?;
        let quote: MeltQuote = self
            .mint_client
            .request_melt_quote(payment_request, &self.config.unit, method)
            .await?;
        let target = quote.amount + quote.fee_reserve;

        let available = self.proof_store.available_by_keyset(None).await?;
        let selected = selection::select_proofs(&available, target)?;
        let keys: Vec<_> = selected.iter().map(proof_store::proof_key).collect();

        let change_shape = selection::split_amount(quote.fee_reserve);
        let blinding = self.derive_outputs(&keyset, &change_shape).await?;
        let outputs: Vec<_> = blinding.iter().map(bdhke::blinded_message).collect();

        self.proof_store.mark_pending(&keys).await?;

        let melt_result = self
            .mint_client
            .melt(
                method,
                mint_client::MeltRequest {
                    quote: quote.quote_id.clone(),
                    inputs: selected.clone(),
                    outputs: Some(outputs),
                },
            )
            .await;

        let response = match melt_result {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "melt request failed, rolling back pending inputs");
                self.proof_store.rollback_pending(&keys).await?;
                return Err(e);
            }
        };

        match response.state {
            MintProofState::Spent => {
                let change_proofs = match response.change {
                    Some(sigs) => self.unblind_all(&keyset, &blinding, &sigs).await?,
                    None => Vec::new(),
                };
                self.proof_store.finalize_pending(&keys).await?;
                if !change_proofs.is_empty() {
                    self.proof_store.add_proofs(change_proofs.clone()).await?;
                }
                tracing::info!(change = change_proofs.len(), "melt paid");
                Ok(MeltOutcome { state: MeltState::Paid, change_proofs })
            }
            MintProofState::Unspent => {
                tracing::warn!("melt reported unspent, rolling back");
                self.proof_store.rollback_pending(&keys).await?;
                Ok(MeltOutcome { state: MeltState::Failed, change_proofs: Vec::new() })
            }
            MintProofState::Pending => {
                tracing::debug!("melt pending, leaving inputs pending for later recovery");
                Ok(MeltOutcome { state: MeltState::Pending, change_proofs: Vec::new() })
            }
        }
    }

    /// Resolves proofs left `PendingSpent` by a crash: queries
    /// `check_state` and finalizes or rolls each back accordingly (spec
    /// §4.4 crash-recovery contract).
    pub async fn recover_pending(&self) -> Result<()> {
        let _span = tracing::info_span!("wallet.recover_pending").entered();
        let _guard = self.op_lock.lock().await;
        self.ensure_ready()?;
        let pending = self.proof_store.pending().await?;
        if pending.is_empty() {
            return Ok(());
        }
        tracing::debug!(pending = pending.len(), "resolving proofs left pending by a crash");
        let states = self.check_state_inner(&pending).await?;
        let mut to_finalize = Vec::new();
        let mut to_rollback = Vec::new();
        for (proof, state) in pending.iter().zip(states.iter()) {
            let key = proof_store::proof_key(proof);
            match state {
                MintProofState::Spent => to_finalize.push(key),
                _ => to_rollback.push(key),
            }
        }
        tracing::info!(
            finalized = to_finalize.len(),
            rolled_back = to_rollback.len(),
            "pending recovery complete"
        );
        self.proof_store.finalize_pending(&to_finalize).await?;
        self.proof_store.rollback_pending(&to_rollback).await?;
        Ok(())
    }

    /// Per-proof state as reported by the mint (NUT-07), by comparing
    /// each proof's own `Y = hashToCurve(secret)` against the mint
    /// response keyed the same way.
    pub async fn check_state(&self, proofs: &[Proof]) -> Result<Vec<MintProofState>> {
        self.ensure_ready()?;
        self.check_state_inner(proofs).await
    }

    async fn check_state_inner(&self, proofs: &[Proof]) -> Result<Vec<MintProofState>> {
        let ys: Vec<String> = proofs
            .iter()
            .map(|p| p.y().map(|y| hex::encode(y.serialize())))
            .collect::<Result<Vec<_>>>()?;
        let response = self
            .mint_client
            .check_state(mint_client::CheckStateRequest { ys: ys.clone() })
            .await?;
        let by_y: HashMap<&str, MintProofState> =
            response.states.iter().map(|e| (e.y.as_str(), e.state)).collect();
        ys.iter()
            .map(|y| by_y.get(y.as_str()).copied().ok_or(Error::InvalidResponse))
            .collect()
    }

    /// Restores proofs from a seed after data loss (NUT-09/NUT-13), one
    /// keyset at a time, batching derivation in groups of `batch_size`
    /// and stopping after 3 consecutive empty batches (spec §4.8 `restore`).
    pub async fn restore(&self, batch_size: u32) -> Result<Vec<Proof>> {
        let span = tracing::info_span!("wallet.restore", batch_size);
        let _enter = span.enter();
        let _guard = self.op_lock.lock().await;
        self.ensure_ready()?;
        let seed = self.seed_copy()?;
        let keyset_ids: Vec<KeysetId> = self.keysets.lock().expect("keysets mutex poisoned").keys().copied().collect();

        let mut restored = Vec::new();
        for keyset_id in keyset_ids {
            let _keyset_span = tracing::debug_span!("restore.keyset", keyset = %keyset_id).entered();
            let keyset = self.keyset_by_id(keyset_id)?;
            let mut cursor = self.counter_store.counter(keyset_id).await?;
            let mut consecutive_empty = 0u32;
            let mut last_nonempty_end = cursor;

            while consecutive_empty < 3 {
                let batch: Vec<u32> = (cursor..cursor + batch_size).collect();
                let mut blinding = Vec::with_capacity(batch.len());
                for counter in &batch {
                    let derived = derivation::derive(&seed, keyset_id, *counter)?;
                    let y = bdhke::hash_to_curve(derived.secret.as_bytes())?;
                    let r_g = crate::crypto::point_mul_generator(&derived.blinding_factor);
                    let blinded_point = crate::crypto::point_add(&y, &r_g)?;
                    blinding.push(WalletBlindingData {
                        secret: derived.secret,
                        blinding_factor: derived.blinding_factor,
                        blinded_point,
                        amount: 0,
                        keyset_id,
                    });
                }
                let outputs: Vec<_> = blinding.iter().map(bdhke::blinded_message).collect();
                let response = self
                    .mint_client
                    .restore(mint_client::RestoreRequest { outputs: outputs.clone() })
                    .await?;

                if response.signatures.is_empty() {
                    consecutive_empty += 1;
                    tracing::debug!(consecutive_empty, cursor, "restore batch returned no signatures");
                    cursor += batch_size;
                    continue;
                }
                consecutive_empty = 0;

                // the mint echoes back only the subset of requested outputs it has a
                // record of, as aligned (output, signature) pairs in request order.
                let mut matched = Vec::new();
                for (o, sig) in response.outputs.iter().zip(response.signatures.iter()) {
                    if let Some(data) = blinding
                        .iter()
                        .find(|d| CompressedPoint::from_public_key(&d.blinded_point) == o.blinded_point)
                    {
                        matched.push((data.clone(), sig.clone()));
                    }
                }
                let mut unblinded = Vec::new();
                for (data, sig) in &matched {
                    let mint_key = keyset.key_for_amount(sig.amount).ok_or(Error::NoActiveKeyset)?;
                    unblinded.push(bdhke::unblind(sig, data, mint_key)?);
                }

                if !unblinded.is_empty() {
                    let states = self.check_state_inner(&unblinded).await?;
                    let unspent: Vec<Proof> = unblinded
                        .into_iter()
                        .zip(states.into_iter())
                        .filter(|(_, s)| *s == MintProofState::Unspent)
                        .map(|(p, _)| p)
                        .collect();
                    if !unspent.is_empty() {
                        self.proof_store.add_proofs(unspent.clone()).await?;
                        restored.extend(unspent);
                    }
                }
                last_nonempty_end = cursor + batch_size;
                cursor += batch_size;
            }
            self.counter_store.advance_to_at_least(keyset_id, last_nonempty_end).await?;
        }
        tracing::info!(restored = restored.len(), "restore complete");
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Settings,
        counter_store::InMemoryCounterStore,
        mint_client::{MintResponse, MockMintClient},
        proof_store::InMemoryProofStore,
        secure_store::MockSecureStore,
        types::{BlindSignature, BlindedMessage, CompressedPoint},
    };
    use secp256k1::SecretKey;
    use std::collections::BTreeMap;

    fn fixed_kid() -> KeysetId {
        KeysetId::from_hex("00ad268c4d1f5826").unwrap()
    }

    fn mint_keypair() -> ([u8; 32], CompressedPoint) {
        let sk_bytes = [7u8; 32];
        let sk = SecretKey::from_slice(&sk_bytes).unwrap();
        let pk = crate::crypto::point_mul_generator(&sk);
        (sk_bytes, CompressedPoint::from_public_key(&pk))
    }

    fn test_keyset(kid: KeysetId, mint_pub: CompressedPoint) -> Keyset {
        let mut keys = BTreeMap::new();
        let mut amount = 1u64;
        while amount <= (1 << 20) {
            keys.insert(amount, mint_pub);
            amount *= 2;
        }
        Keyset { id: kid, unit: "sat".to_string(), active: true, fee_ppk: None, keys }
    }

    fn sign_outputs(sk_bytes: &[u8; 32], outputs: &[BlindedMessage]) -> Vec<BlindSignature> {
        let sk = SecretKey::from_slice(sk_bytes).unwrap();
        outputs
            .iter()
            .map(|o| {
                let b = o.blinded_point.to_public_key().unwrap();
                let c_ = crate::crypto::point_mul(&b, &sk).unwrap();
                BlindSignature {
                    amount: o.amount,
                    keyset_id: o.keyset_id,
                    blind_signature_c: CompressedPoint::from_public_key(&c_),
                    dleq: None,
                }
            })
            .collect()
    }

    fn base_config() -> Config {
        Config::new(Settings { mint_url: "https://mint.example".to_string(), ..Default::default() }).unwrap()
    }

    fn mock_secure_store() -> MockSecureStore {
        let mut secure = MockSecureStore::new();
        secure.expect_save_mnemonic().returning(|_| Ok(()));
        secure.expect_save_seed().returning(|_| Ok(()));
        secure
    }

    fn build_wallet(
        mut mint: MockMintClient,
        mint_pub: CompressedPoint,
        proof_store: Arc<dyn ProofStorage>,
        counter_store: Arc<dyn KeysetCounterStorage>,
    ) -> (Wallet, KeysetId) {
        let kid = fixed_kid();
        let ks = test_keyset(kid, mint_pub);
        mint.expect_get_keysets().returning(move || Ok(vec![ks.clone()]));
        let wallet = Wallet::new(
            base_config(),
            Arc::new(mint),
            proof_store,
            counter_store,
            Arc::new(mock_secure_store()),
        );
        (wallet, kid)
    }

    fn default_wallet(mint: MockMintClient, mint_pub: CompressedPoint) -> (Wallet, KeysetId) {
        build_wallet(
            mint,
            mint_pub,
            Arc::new(InMemoryProofStore::new()),
            Arc::new(InMemoryCounterStore::new()),
        )
    }

    #[tokio::test]
    async fn initialize_fetches_keysets_and_becomes_ready() {
        let (_sk, pk) = mint_keypair();
        let (wallet, _kid) = default_wallet(MockMintClient::new(), pk);
        wallet.initialize(None, None).await.unwrap();
        assert_eq!(wallet.state(), WalletState::Ready);
    }

    #[tokio::test]
    async fn initialize_twice_errors() {
        let (_sk, pk) = mint_keypair();
        let (wallet, _kid) = default_wallet(MockMintClient::new(), pk);
        wallet.initialize(None, None).await.unwrap();
        let err = wallet.initialize(None, None).await.unwrap_err();
        assert!(matches!(err, Error::WalletAlreadyInitialized));
    }

    #[tokio::test]
    async fn balance_before_initialize_errors() {
        let (_sk, pk) = mint_keypair();
        let (wallet, _kid) = default_wallet(MockMintClient::new(), pk);
        let err = wallet.balance().await.unwrap_err();
        assert!(matches!(err, Error::WalletNotInitialized));
    }

    #[tokio::test]
    async fn mint_quote_not_paid_is_rejected() {
        let (_sk, pk) = mint_keypair();
        let mut mock = MockMintClient::new();
        mock.expect_get_mint_quote().returning(|_, id| {
            Ok(MintQuote {
                quote_id: id.to_string(),
                request: "req".into(),
                amount: 13,
                unit: "sat".into(),
                paid: false,
                expiry: 0,
            })
        });
        let (wallet, _kid) = default_wallet(mock, pk);
        wallet.initialize(None, None).await.unwrap();
        let err = wallet.mint("q1", 13, "bolt11").await.unwrap_err();
        assert!(matches!(err, Error::QuotePending));
    }

    #[tokio::test]
    async fn mint_happy_path_produces_matching_proofs() {
        let (sk_bytes, pk) = mint_keypair();
        let mut mock = MockMintClient::new();
        mock.expect_get_mint_quote().returning(|_, id| {
            Ok(MintQuote {
                quote_id: id.to_string(),
                request: "req".into(),
                amount: 13,
                unit: "sat".into(),
                paid: true,
                expiry: 0,
            })
        });
        mock.expect_mint().returning(move |_, req| {
            Ok(MintResponse { signatures: sign_outputs(&sk_bytes, &req.outputs) })
        });
        let (wallet, _kid) = default_wallet(mock, pk);
        wallet.initialize(None, None).await.unwrap();

        let proofs = wallet.mint("q1", 13, "bolt11").await.unwrap();
        assert_eq!(proofs.iter().map(|p| p.amount).sum::<u64>(), 13);
        assert_eq!(wallet.balance().await.unwrap(), 13);
    }

    #[tokio::test]
    async fn mint_rejects_mismatched_signature_count() {
        let (_sk, pk) = mint_keypair();
        let mut mock = MockMintClient::new();
        mock.expect_get_mint_quote().returning(|_, id| {
            Ok(MintQuote {
                quote_id: id.to_string(),
                request: "req".into(),
                amount: 8,
                unit: "sat".into(),
                paid: true,
                expiry: 0,
            })
        });
        mock.expect_mint().returning(|_, _| Ok(MintResponse { signatures: Vec::new() }));
        let (wallet, _kid) = default_wallet(mock, pk);
        wallet.initialize(None, None).await.unwrap();
        let err = wallet.mint("q1", 8, "bolt11").await.unwrap_err();
        assert!(matches!(err, Error::InvalidResponse));
    }

    #[tokio::test]
    async fn send_rolls_back_inputs_on_swap_failure() {
        let (sk_bytes, pk) = mint_keypair();
        let mut mock = MockMintClient::new();
        mock.expect_get_mint_quote().returning(|_, id| {
            Ok(MintQuote {
                quote_id: id.to_string(),
                request: "req".into(),
                amount: 8,
                unit: "sat".into(),
                paid: true,
                expiry: 0,
            })
        });
        mock.expect_mint().returning(move |_, req| {
            Ok(MintResponse { signatures: sign_outputs(&sk_bytes, &req.outputs) })
        });
        mock.expect_swap().returning(|_| Err(Error::Network("mint unreachable".into())));
        let (wallet, _kid) = default_wallet(mock, pk);
        wallet.initialize(None, None).await.unwrap();
        wallet.mint("q1", 8, "bolt11").await.unwrap();
        assert_eq!(wallet.balance().await.unwrap(), 8);

        let err = wallet.send(8, None).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
        // the failed swap rolled the selected input back to Available
        assert_eq!(wallet.balance().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn send_happy_path_produces_token_with_change() {
        let (sk_bytes, pk) = mint_keypair();
        let mut mock = MockMintClient::new();
        mock.expect_get_mint_quote().returning(|_, id| {
            Ok(MintQuote {
                quote_id: id.to_string(),
                request: "req".into(),
                amount: 16,
                unit: "sat".into(),
                paid: true,
                expiry: 0,
            })
        });
        let sk_bytes_for_mint = sk_bytes;
        mock.expect_mint().returning(move |_, req| {
            Ok(MintResponse { signatures: sign_outputs(&sk_bytes_for_mint, &req.outputs) })
        });
        mock.expect_swap().returning(move |req| {
            Ok(crate::mint_client::SwapResponse { signatures: sign_outputs(&sk_bytes, &req.outputs) })
        });
        let (wallet, _kid) = default_wallet(mock, pk);
        wallet.initialize(None, None).await.unwrap();
        wallet.mint("q1", 16, "bolt11").await.unwrap();

        let token = wallet.send(5, None).await.unwrap();
        assert_eq!(token.total_amount(), 5);
        // 16 - 5 = 11 left as change, still ours
        assert_eq!(wallet.balance().await.unwrap(), 11);
    }

    #[tokio::test]
    async fn receive_rejects_foreign_mint_entry() {
        let (_sk, pk) = mint_keypair();
        let (wallet, kid) = default_wallet(MockMintClient::new(), pk);
        wallet.initialize(None, None).await.unwrap();

        let token = CashuToken {
            entries: vec![TokenEntry {
                mint_url: "https://not-our-mint.example".to_string(),
                proofs: vec![Proof {
                    amount: 4,
                    keyset_id: kid,
                    secret: "s".to_string(),
                    signature_c: pk,
                    witness: None,
                    dleq: None,
                }],
            }],
            unit: Some("sat".to_string()),
            memo: None,
        };
        let err = wallet.receive(&token).await.unwrap_err();
        assert!(matches!(err, Error::InvalidMintConfiguration));
    }

    #[tokio::test]
    async fn recover_pending_finalizes_spent_and_rolls_back_unspent() {
        let (_sk, pk) = mint_keypair();
        let kid = fixed_kid();
        let proof_store: Arc<dyn ProofStorage> = Arc::new(InMemoryProofStore::new());
        let counter_store: Arc<dyn KeysetCounterStorage> = Arc::new(InMemoryCounterStore::new());

        let secret_spent = "recover-spent".to_string();
        let secret_unspent = "recover-unspent".to_string();
        let sk = SecretKey::from_slice(&[3u8; 32]).unwrap();
        let dummy_c = CompressedPoint::from_public_key(&crate::crypto::point_mul_generator(&sk));
        let spent_proof = Proof {
            amount: 2,
            keyset_id: kid,
            secret: secret_spent.clone(),
            signature_c: dummy_c,
            witness: None,
            dleq: None,
        };
        let unspent_proof = Proof {
            amount: 4,
            keyset_id: kid,
            secret: secret_unspent.clone(),
            signature_c: CompressedPoint::from_public_key(&crate::crypto::point_mul_generator(
                &SecretKey::from_slice(&[4u8; 32]).unwrap(),
            )),
            witness: None,
            dleq: None,
        };
        proof_store.add_proofs(vec![spent_proof.clone(), unspent_proof.clone()]).await.unwrap();
        proof_store
            .mark_pending(&[proof_store::proof_key(&spent_proof), proof_store::proof_key(&unspent_proof)])
            .await
            .unwrap();

        let spent_y = hex::encode(spent_proof.y().unwrap().serialize());
        let unspent_y = hex::encode(unspent_proof.y().unwrap().serialize());

        let mut mock = MockMintClient::new();
        mock.expect_check_state().returning(move |req| {
            let states = req
                .ys
                .iter()
                .map(|y| {
                    let state = if *y == spent_y {
                        MintProofState::Spent
                    } else if *y == unspent_y {
                        MintProofState::Unspent
                    } else {
                        MintProofState::Unspent
                    };
                    mint_client::ProofStateEntry { y: y.clone(), state }
                })
                .collect();
            Ok(mint_client::CheckStateResponse { states })
        });

        let (wallet, _kid) = build_wallet(mock, pk, proof_store.clone(), counter_store);
        wallet.initialize(None, None).await.unwrap();

        wallet.recover_pending().await.unwrap();
        assert!(proof_store.pending().await.unwrap().is_empty());
        // the unspent proof rolled back to Available; the spent one was finalized away
        let available = proof_store.available_by_keyset(None).await.unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].secret, secret_unspent);
    }

    #[tokio::test]
    async fn melt_happy_path_reports_paid_with_change() {
        let (sk_bytes, pk) = mint_keypair();
        let mut mock = MockMintClient::new();
        mock.expect_get_mint_quote().returning(|_, id| {
            Ok(MintQuote {
                quote_id: id.to_string(),
                request: "req".into(),
                amount: 8,
                unit: "sat".into(),
                paid: true,
                expiry: 0,
            })
        });
        let sk_for_mint = sk_bytes;
        mock.expect_mint().returning(move |_, req| {
            Ok(MintResponse { signatures: sign_outputs(&sk_for_mint, &req.outputs) })
        });
        mock.expect_request_melt_quote().returning(|_, _, _| {
            Ok(MeltQuote {
                quote_id: "m1".to_string(),
                amount: 6,
                fee_reserve: 1,
                unit: "sat".into(),
                paid: false,
                expiry: 0,
            })
        });
        mock.expect_melt().returning(move |_, req| {
            Ok(crate::mint_client::MeltResponse {
                state: MintProofState::Spent,
                change: Some(sign_outputs(&sk_bytes, req.outputs.as_deref().unwrap_or(&[]))),
            })
        });
        let (wallet, _kid) = default_wallet(mock, pk);
        wallet.initialize(None, None).await.unwrap();
        wallet.mint("q1", 8, "bolt11").await.unwrap();

        let outcome = wallet.melt("lnbc1...", "bolt11").await.unwrap();
        assert_eq!(outcome.state, MeltState::Paid);
        // quote demanded 7 (amount + fee_reserve); the mint paid 6 and returned 1 back as change
        assert_eq!(outcome.change_proofs.iter().map(|p| p.amount).sum::<u64>(), 1);
    }

    #[tokio::test]
    async fn check_state_maps_responses_by_y() {
        let (_sk, pk) = mint_keypair();
        let kid = fixed_kid();
        let proof = Proof {
            amount: 2,
            keyset_id: kid,
            secret: "check-state-secret".to_string(),
            signature_c: pk,
            witness: None,
            dleq: None,
        };
        let y = hex::encode(proof.y().unwrap().serialize());
        let mut mock = MockMintClient::new();
        mock.expect_check_state().returning(move |req| {
            assert_eq!(req.ys, vec![y.clone()]);
            Ok(mint_client::CheckStateResponse {
                states: vec![mint_client::ProofStateEntry { y: y.clone(), state: MintProofState::Spent }],
            })
        });
        let (wallet, _kid) = default_wallet(mock, pk);
        wallet.initialize(None, None).await.unwrap();

        let states = wallet.check_state(&[proof]).await.unwrap();
        assert_eq!(states, vec![MintProofState::Spent]);
    }

    #[tokio::test]
    async fn restore_stops_after_three_consecutive_empty_batches() {
        let (_sk, pk) = mint_keypair();
        let mut mock = MockMintClient::new();
        mock.expect_restore().returning(|req| {
            Ok(mint_client::RestoreResponse { outputs: req.outputs, signatures: Vec::new() })
        });
        let (wallet, _kid) = default_wallet(mock, pk);
        wallet.initialize(None, None).await.unwrap();

        let restored = wallet.restore(4).await.unwrap();
        assert!(restored.is_empty());
    }
}
