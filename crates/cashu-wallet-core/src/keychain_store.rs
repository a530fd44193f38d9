//! Feature-gated `SecureStore` backed by the OS keychain/secret-service via
//! the `keyring` crate (spec §4.7): the native-host equivalent of what the
//! reference wallet does with `rexie`/IndexedDB on its wasm target. No
//! envelope format is needed here — the OS already encrypts at rest.
// ----- standard library imports
// ----- extra library imports
use async_trait::async_trait;
// ----- local imports
use crate::{
    config::KeychainAccessPolicy,
    error::{Error, Result},
    secure_store::{AccessTokenListMap, AccessTokenMap, RecordKind, SecureStore, SensitiveBytes},
};

// ----- end imports

/// `SecureStore` backed by the platform keychain. Items are namespaced
/// `"<service_prefix>.<kind>"`; `access_policy` is recorded for the caller's
/// reference only — enforcement is platform/OS-side, the `keyring` crate
/// does not expose a portable way to set it.
pub struct KeychainSecureStore {
    service_prefix: String,
    access_policy: KeychainAccessPolicy,
}

const ACCOUNT: &str = "cashu-wallet";

impl KeychainSecureStore {
    pub fn new(service_prefix: String, access_policy: KeychainAccessPolicy) -> Self {
        Self { service_prefix, access_policy }
    }

    pub fn access_policy(&self) -> KeychainAccessPolicy {
        self.access_policy
    }

    fn entry(&self, kind: RecordKind) -> Result<keyring::Entry> {
        let service = format!("{}.{}", self.service_prefix, kind.as_str());
        keyring::Entry::new(&service, ACCOUNT).map_err(|e| Error::StoreFailed(e.to_string()))
    }

    fn save_bytes(&self, kind: RecordKind, bytes: &[u8]) -> Result<()> {
        self.entry(kind)?.set_secret(bytes).map_err(|e| Error::StoreFailed(e.to_string()))
    }

    fn load_bytes(&self, kind: RecordKind) -> Result<Vec<u8>> {
        self.entry(kind)?.get_secret().map_err(|e| Error::RetrievalFailed(e.to_string()))
    }

    fn try_load_bytes(&self, kind: RecordKind) -> Result<Option<Vec<u8>>> {
        match self.entry(kind)?.get_secret() {
            Ok(bytes) => Ok(Some(bytes)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::RetrievalFailed(e.to_string())),
        }
    }
}

#[async_trait]
impl SecureStore for KeychainSecureStore {
    async fn save_mnemonic(&self, mnemonic: &str) -> Result<()> {
        self.save_bytes(RecordKind::Mnemonic, mnemonic.as_bytes())
    }

    async fn load_mnemonic(&self) -> Result<SensitiveBytes> {
        Ok(SensitiveBytes::new(self.load_bytes(RecordKind::Mnemonic)?))
    }

    async fn save_seed(&self, seed: &[u8]) -> Result<()> {
        self.save_bytes(RecordKind::Seed, seed)
    }

    async fn load_seed(&self) -> Result<SensitiveBytes> {
        Ok(SensitiveBytes::new(self.load_bytes(RecordKind::Seed)?))
    }

    async fn save_access_tokens(&self, tokens: &AccessTokenMap) -> Result<()> {
        let json = serde_json::to_vec(&tokens.0).map_err(|e| Error::StoreFailed(e.to_string()))?;
        self.save_bytes(RecordKind::AccessTokens, &json)
    }

    async fn load_access_tokens(&self) -> Result<AccessTokenMap> {
        match self.try_load_bytes(RecordKind::AccessTokens)? {
            Some(bytes) => {
                let map = serde_json::from_slice(&bytes).map_err(|e| Error::RetrievalFailed(e.to_string()))?;
                Ok(AccessTokenMap(map))
            }
            None => Ok(AccessTokenMap::default()),
        }
    }

    async fn save_access_token_lists(&self, tokens: &AccessTokenListMap) -> Result<()> {
        let json = serde_json::to_vec(&tokens.0).map_err(|e| Error::StoreFailed(e.to_string()))?;
        self.save_bytes(RecordKind::AccessTokenLists, &json)
    }

    async fn load_access_token_lists(&self) -> Result<AccessTokenListMap> {
        match self.try_load_bytes(RecordKind::AccessTokenLists)? {
            Some(bytes) => {
                let map = serde_json::from_slice(&bytes).map_err(|e| Error::RetrievalFailed(e.to_string()))?;
                Ok(AccessTokenListMap(map))
            }
            None => Ok(AccessTokenListMap::default()),
        }
    }

    async fn delete_all(&self) -> Result<()> {
        for kind in [
            RecordKind::Mnemonic,
            RecordKind::Seed,
            RecordKind::AccessTokens,
            RecordKind::AccessTokenLists,
        ] {
            match self.entry(kind)?.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => {}
                Err(e) => return Err(Error::DeletionFailed(e.to_string())),
            }
        }
        Ok(())
    }

    /// The OS keychain manages its own at-rest encryption; there is no
    /// wallet-held master key to rotate here.
    async fn rotate_master_key(&self, _new_password: Option<&str>) -> Result<()> {
        Err(Error::UnsupportedOperation(
            "rotate_master_key is not applicable to the OS keychain backend".into(),
        ))
    }
}
