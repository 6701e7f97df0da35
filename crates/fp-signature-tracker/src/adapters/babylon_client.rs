//! HTTP implementation of [`BlockchainQueryClient`] for a Babylon chain.
//!
//! - chain height from CometBFT RPC `GET /status`
//! - votes, epochs and providers from the LCD REST API

use crate::config::{ChainConfig, Network};
use crate::domain::types::{BlockHeight, EpochInfo, ProviderKey};
use crate::error::{TrackerError, TrackerResult};
use crate::ports::outbound::{
    BlockchainQueryClient, ChainQueryError, ChainQueryResult, FinalityProviderInfo, VoteRecord,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const VOTES_PATH: &str = "/babylon/finality/v1/votes";
const EPOCH_PATH: &str = "/babylon/epoching/v1/current_epoch";
const PROVIDERS_PATH: &str = "/babylon/btcstaking/v1/finality_providers";

/// Page cap when walking the provider listing.
const MAX_PROVIDER_PAGES: usize = 100;

/// RPC and LCD base URLs of one network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkEndpoints {
    pub rpc_url: String,
    pub lcd_url: String,
}

impl NetworkEndpoints {
    pub fn new(rpc_url: impl Into<String>, lcd_url: impl Into<String>) -> Self {
        Self {
            rpc_url: trim_base(rpc_url.into()),
            lcd_url: trim_base(lcd_url.into()),
        }
    }
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

/// Babylon chain client over reqwest.
pub struct BabylonClient {
    http: Client,
    network: Network,
    endpoints: HashMap<Network, NetworkEndpoints>,
}

impl BabylonClient {
    /// Build from chain configuration.
    ///
    /// Missing primary endpoints are a configuration error. Secondary
    /// endpoints, when both are set, serve the other network's provider list.
    pub fn from_config(config: &ChainConfig) -> TrackerResult<Self> {
        let rpc_url = config
            .rpc_url
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| TrackerError::Configuration("chain.rpc_url is not set".into()))?;
        let lcd_url = config
            .lcd_url
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| TrackerError::Configuration("chain.lcd_url is not set".into()))?;

        let mut endpoints = HashMap::new();
        endpoints.insert(config.network, NetworkEndpoints::new(rpc_url, lcd_url));

        if let (Some(rpc), Some(lcd)) = (&config.secondary_rpc_url, &config.secondary_lcd_url) {
            let other = match config.network {
                Network::Mainnet => Network::Testnet,
                Network::Testnet => Network::Mainnet,
            };
            endpoints.insert(other, NetworkEndpoints::new(rpc.clone(), lcd.clone()));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| TrackerError::Configuration(format!("HTTP client error: {e}")))?;

        Ok(Self {
            http,
            network: config.network,
            endpoints,
        })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    fn endpoints_for(&self, network: Network) -> ChainQueryResult<&NetworkEndpoints> {
        self.endpoints
            .get(&network)
            .ok_or(ChainQueryError::UnknownNetwork(network))
    }

    fn primary(&self) -> ChainQueryResult<&NetworkEndpoints> {
        self.endpoints_for(self.network)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        requested: Option<BlockHeight>,
    ) -> ChainQueryResult<T> {
        let resp = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| ChainQueryError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if let Some(requested) = requested {
                if let Some(err) = classify_error_message(&body, requested) {
                    return Err(err);
                }
            }
            return Err(ChainQueryError::Transport(format!("HTTP {status} from {url}: {body}")));
        }

        resp.json::<T>()
            .await
            .map_err(|e| ChainQueryError::Decode(format!("{url}: {e}")))
    }
}

/// Detect "height not produced yet" in a chain error body.
///
/// Cosmos SDK and CometBFT phrase this several ways; anything else is left to
/// the caller as a transport failure.
pub fn classify_error_message(body: &str, requested: BlockHeight) -> Option<ChainQueryError> {
    let lower = body.to_ascii_lowercase();
    let is_future = ["must be less than or equal to", "higher than", "is greater than the current", "future"]
        .iter()
        .any(|needle| lower.contains(needle));
    if !is_future {
        return None;
    }
    Some(ChainQueryError::FutureHeight {
        requested,
        current: last_number_in(&lower).unwrap_or(0),
    })
}

fn last_number_in(text: &str) -> Option<u64> {
    text.split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .last()
        .and_then(|s| s.parse().ok())
}

#[derive(Deserialize)]
struct StatusResponse {
    result: StatusResult,
}

#[derive(Deserialize)]
struct StatusResult {
    sync_info: SyncInfo,
}

#[serde_as]
#[derive(Deserialize)]
struct SyncInfo {
    #[serde_as(as = "DisplayFromStr")]
    latest_block_height: u64,
}

#[derive(Deserialize)]
struct VotesResponse {
    #[serde(default)]
    btc_pks: Vec<String>,
}

#[serde_as]
#[derive(Deserialize)]
struct CurrentEpochResponse {
    #[serde_as(as = "DisplayFromStr")]
    current_epoch: u64,
    #[serde_as(as = "DisplayFromStr")]
    epoch_boundary: u64,
}

#[derive(Deserialize)]
struct ProvidersResponse {
    #[serde(default)]
    finality_providers: Vec<ProviderEntry>,
    pagination: Option<Pagination>,
}

#[derive(Deserialize)]
struct Pagination {
    next_key: Option<String>,
}

#[serde_as]
#[derive(Deserialize)]
struct ProviderEntry {
    btc_pk: String,
    description: Option<ProviderDescription>,
    #[serde(default)]
    jailed: bool,
    #[serde_as(as = "Option<DisplayFromStr>")]
    slashed_babylon_height: Option<u64>,
}

#[derive(Deserialize)]
struct ProviderDescription {
    moniker: Option<String>,
}

impl From<ProviderEntry> for FinalityProviderInfo {
    fn from(entry: ProviderEntry) -> Self {
        Self {
            btc_pk: ProviderKey::new(&entry.btc_pk),
            moniker: entry
                .description
                .and_then(|d| d.moniker)
                .filter(|m| !m.is_empty()),
            jailed: entry.jailed,
            slashed: entry.slashed_babylon_height.unwrap_or(0) > 0,
        }
    }
}

#[async_trait]
impl BlockchainQueryClient for BabylonClient {
    async fn get_current_height(&self) -> ChainQueryResult<BlockHeight> {
        let url = format!("{}/status", self.primary()?.rpc_url);
        let status: StatusResponse = self.get_json(&url, &[], None).await?;
        Ok(status.result.sync_info.latest_block_height)
    }

    async fn get_votes_at_height(&self, height: BlockHeight) -> ChainQueryResult<Vec<VoteRecord>> {
        let url = format!("{}{VOTES_PATH}/{height}", self.primary()?.lcd_url);
        let votes: VotesResponse = self.get_json(&url, &[], Some(height)).await?;
        debug!(height, votes = votes.btc_pks.len(), "Fetched finality votes");
        Ok(votes.btc_pks.into_iter().map(VoteRecord::new).collect())
    }

    async fn get_current_epoch(&self) -> ChainQueryResult<EpochInfo> {
        let url = format!("{}{EPOCH_PATH}", self.primary()?.lcd_url);
        let epoch: CurrentEpochResponse = self.get_json(&url, &[], None).await?;
        Ok(EpochInfo::new(epoch.current_epoch, epoch.epoch_boundary))
    }

    async fn get_all_finality_providers(
        &self,
        network: Network,
    ) -> ChainQueryResult<Vec<FinalityProviderInfo>> {
        let url = format!("{}{PROVIDERS_PATH}", self.endpoints_for(network)?.lcd_url);
        let mut providers = Vec::new();
        let mut next_key: Option<String> = None;

        for _ in 0..MAX_PROVIDER_PAGES {
            let page: ProvidersResponse = match &next_key {
                Some(key) => self.get_json(&url, &[("pagination.key", key.as_str())], None).await?,
                None => self.get_json(&url, &[], None).await?,
            };
            providers.extend(page.finality_providers.into_iter().map(FinalityProviderInfo::from));

            next_key = page
                .pagination
                .and_then(|p| p.next_key)
                .filter(|k| !k.is_empty());
            if next_key.is_none() {
                return Ok(providers);
            }
        }

        warn!(%network, pages = MAX_PROVIDER_PAGES, "Provider listing truncated");
        Ok(providers)
    }
}
