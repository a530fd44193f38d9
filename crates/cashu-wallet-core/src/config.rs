// ----- standard library imports
// ----- extra library imports
use serde::{Deserialize, Serialize};
// ----- local imports
use crate::error::Result;

// ----- end imports

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum KeychainAccessPolicy {
    None,
    UserPresence,
    BiometryAny,
    BiometryCurrentSet,
    DevicePasscode,
}

impl Default for KeychainAccessPolicy {
    fn default() -> Self {
        Self::None
    }
}

/// Layered wallet settings: struct defaults, overridable by `config.toml` and
/// `CASHU_WALLET_`-prefixed environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub mint_url: String,
    pub unit: String,
    pub retry_attempts: u32,
    pub retry_base_delay_s: f64,
    pub operation_timeout_s: f64,
    pub keychain_access_policy: KeychainAccessPolicy,
    pub storage_dir: String,
    pub password: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mint_url: String::new(),
            unit: "sat".to_string(),
            retry_attempts: 3,
            retry_base_delay_s: 1.0,
            operation_timeout_s: 30.0,
            keychain_access_policy: KeychainAccessPolicy::None,
            storage_dir: ".cashu-wallet".to_string(),
            password: None,
        }
    }
}

/// Runtime configuration derived from `Settings`: parsed/validated values the
/// orchestrator consumes directly.
#[derive(Debug, Clone)]
pub struct Config {
    pub mint_url: url::Url,
    pub unit: String,
    pub retry_attempts: u32,
    pub retry_base_delay_s: f64,
    pub operation_timeout_s: f64,
    pub keychain_access_policy: KeychainAccessPolicy,
    pub storage_dir: std::path::PathBuf,
    pub password: Option<String>,
}

impl Config {
    pub fn new(settings: Settings) -> Result<Self> {
        let mint_url = url::Url::parse(&settings.mint_url)
            .map_err(|e| crate::error::Error::InvalidMintUrl(e.to_string()))?;
        // spec §6: HTTPS is required, HTTP rejected.
        if mint_url.scheme() != "https" {
            return Err(crate::error::Error::InvalidMintUrl(settings.mint_url));
        }
        Ok(Self {
            mint_url,
            unit: settings.unit,
            retry_attempts: settings.retry_attempts,
            retry_base_delay_s: settings.retry_base_delay_s,
            operation_timeout_s: settings.operation_timeout_s,
            keychain_access_policy: settings.keychain_access_policy,
            storage_dir: std::path::PathBuf::from(settings.storage_dir),
            password: settings.password,
        })
    }

    /// Loads settings from `config.toml` in the current directory (if present)
    /// overlaid with `CASHU_WALLET_`-prefixed environment variables, then
    /// builds a validated `Config`.
    pub fn load() -> Result<Self> {
        let settings: Settings = config::Config::builder()
            .add_source(config::Config::try_from(&Settings::default())?)
            .add_source(config::File::with_name("config.toml").required(false))
            .add_source(config::Environment::with_prefix("CASHU_WALLET").separator("__"))
            .build()?
            .try_deserialize()?;
        Self::new(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_documented_defaults() {
        let s = Settings::default();
        assert_eq!(s.unit, "sat");
        assert_eq!(s.retry_attempts, 3);
        assert_eq!(s.retry_base_delay_s, 1.0);
        assert_eq!(s.operation_timeout_s, 30.0);
        assert_eq!(s.keychain_access_policy, KeychainAccessPolicy::None);
    }

    #[test]
    fn config_rejects_non_http_scheme() {
        let mut s = Settings::default();
        s.mint_url = "ftp://mint.example".to_string();
        assert!(Config::new(s).is_err());
    }

    #[test]
    fn config_rejects_plain_http_scheme() {
        let mut s = Settings::default();
        s.mint_url = "http://mint.example".to_string();
        assert!(Config::new(s).is_err());
    }

    #[test]
    fn config_accepts_https_mint_url() {
        let mut s = Settings::default();
        s.mint_url = "https://mint.example".to_string();
        let cfg = Config::new(s).unwrap();
        assert_eq!(cfg.mint_url.as_str(), "https://mint.example/");
    }
}
