//! Concrete `MintClient`: the transport this core ships with (spec §6).
//! Wraps `reqwest` behind the same thin `RestClient` shape the reference
//! wallet uses for its mint connector, adding the idempotency-key header
//! and capped-exponential-backoff retry this core's config calls for.
// ----- standard library imports
use std::time::Duration;
// ----- extra library imports
use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode, Url};
use serde::{Serialize, de::DeserializeOwned};
// ----- local imports
use crate::{
    config::Config,
    error::{Error, Result},
    mint_client::{
        CheckStateRequest, CheckStateResponse, MeltRequest, MeltResponse, MintClient, MintInfo,
        MintRequest, MintResponse, RestoreRequest, RestoreResponse, SwapRequest, SwapResponse,
    },
    types::{Keyset, KeysetId, MeltQuote, MintQuote},
};

// ----- end imports

/// Thin GET/POST wrapper, mirroring the reference wallet's
/// `mint::connector::RestClient` but adding retry and idempotency headers.
struct RestClient {
    http: HttpClient,
    retry_attempts: u32,
    retry_base_delay: Duration,
}

impl RestClient {
    fn new(timeout: Duration, retry_attempts: u32, retry_base_delay: Duration) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self { http, retry_attempts, retry_base_delay })
    }

    async fn retrying<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.retry_attempts && is_transient(&e) => {
                    tracing::warn!(attempt, error = %e, "mint request failed, retrying");
                    let delay = self.retry_base_delay * 2u32.saturating_pow(attempt);
                    let jitter = Duration::from_millis(rand::random::<u64>() % 100);
                    tokio::time::sleep(delay + jitter).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        self.retrying(|| async {
            let resp = self.http.get(url.clone()).send().await.map_err(map_reqwest_err)?;
            read_json(resp).await
        })
        .await
    }

    async fn post<Req: Serialize, Res: DeserializeOwned>(
        &self,
        url: Url,
        body: &Req,
        idempotency_key: &str,
    ) -> Result<Res> {
        self.retrying(|| async {
            let resp = self
                .http
                .post(url.clone())
                .header("Idempotency-Key", idempotency_key)
                .json(body)
                .send()
                .await
                .map_err(map_reqwest_err)?;
            read_json(resp).await
        })
        .await
    }
}

fn is_transient(e: &Error) -> bool {
    matches!(e, Error::Network(_) | Error::OperationTimeout | Error::RateLimited)
}

fn map_reqwest_err(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::OperationTimeout
    } else {
        Error::Network(e.to_string())
    }
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(Error::RateLimited);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::HttpError(status.as_u16(), body));
    }
    resp.json().await.map_err(|e| Error::DeserializationFailed(e.to_string()))
}

/// `reqwest`-backed `MintClient`, built against one mint's base URL (spec
/// §6: HTTPS-only, structural response validation, idempotency keys on
/// state-creating POSTs).
pub struct HttpMintClient {
    base_url: Url,
    client: RestClient,
}

impl HttpMintClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = RestClient::new(
            Duration::from_secs_f64(config.operation_timeout_s),
            config.retry_attempts,
            Duration::from_secs_f64(config.retry_base_delay_s),
        )?;
        Ok(Self { base_url: config.mint_url.clone(), client })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(|e| Error::InvalidMintUrl(e.to_string()))
    }

    fn idempotency_key() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

#[derive(serde::Deserialize)]
struct KeysetsResponse {
    keysets: Vec<Keyset>,
}

#[async_trait]
impl MintClient for HttpMintClient {
    async fn get_info(&self) -> Result<MintInfo> {
        self.client.get(self.url("v1/info")?).await
    }

    async fn get_keys(&self, keyset_id: Option<KeysetId>) -> Result<Vec<Keyset>> {
        let path = match keyset_id {
            Some(id) => format!("v1/keys/{id}"),
            None => "v1/keys".to_string(),
        };
        let response: KeysetsResponse = self.client.get(self.url(&path)?).await?;
        Ok(response.keysets)
    }

    async fn get_keysets(&self) -> Result<Vec<Keyset>> {
        let response: KeysetsResponse = self.client.get(self.url("v1/keysets")?).await?;
        Ok(response.keysets)
    }

    async fn request_mint_quote(&self, amount: u64, unit: &str, method: &str) -> Result<MintQuote> {
        #[derive(Serialize)]
        struct Req<'a> {
            amount: u64,
            unit: &'a str,
        }
        self.client
            .post(
                self.url(&format!("v1/mint/quote/{method}"))?,
                &Req { amount, unit },
                &Self::idempotency_key(),
            )
            .await
    }

    async fn get_mint_quote(&self, method: &str, quote_id: &str) -> Result<MintQuote> {
        self.client.get(self.url(&format!("v1/mint/quote/{method}/{quote_id}"))?).await
    }

    async fn mint(&self, method: &str, request: MintRequest) -> Result<MintResponse> {
        self.client
            .post(self.url(&format!("v1/mint/{method}"))?, &request, &Self::idempotency_key())
            .await
    }

    async fn request_melt_quote(&self, request: &str, unit: &str, method: &str) -> Result<MeltQuote> {
        #[derive(Serialize)]
        struct Req<'a> {
            request: &'a str,
            unit: &'a str,
        }
        self.client
            .post(
                self.url(&format!("v1/melt/quote/{method}"))?,
                &Req { request, unit },
                &Self::idempotency_key(),
            )
            .await
    }

    async fn get_melt_quote(&self, method: &str, quote_id: &str) -> Result<MeltQuote> {
        self.client.get(self.url(&format!("v1/melt/quote/{method}/{quote_id}"))?).await
    }

    async fn melt(&self, method: &str, request: MeltRequest) -> Result<MeltResponse> {
        self.client
            .post(self.url(&format!("v1/melt/{method}"))?, &request, &Self::idempotency_key())
            .await
    }

    async fn swap(&self, request: SwapRequest) -> Result<SwapResponse> {
        self.client.post(self.url("v1/swap")?, &request, &Self::idempotency_key()).await
    }

    async fn check_state(&self, request: CheckStateRequest) -> Result<CheckStateResponse> {
        self.client.post(self.url("v1/checkstate")?, &request, &Self::idempotency_key()).await
    }

    async fn restore(&self, request: RestoreRequest) -> Result<RestoreResponse> {
        self.client.post(self.url("v1/restore")?, &request, &Self::idempotency_key()).await
    }
}
