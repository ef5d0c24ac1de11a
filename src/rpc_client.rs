use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use crate::error::RpcError;

pub mod types;

use types::{
    BlockHeader, BlockResults, ContractsByCodeResponse, EpochInfo, EpochsResponse, Event,
    GetBlockResponse, GetTxsEventResponse, JsonRpcResponse, MergedTx, NodeStatus, RawBlockResults,
    StatusResult,
};

/// Transactions requested per page from the REST gateway.
const TX_PAGE_LIMIT: usize = 100;

/// Client for a Cosmos node: the Tendermint RPC for status and block results,
/// the REST gateway for blocks, transactions and module queries.
#[derive(Debug, Clone)]
pub struct RpcClient {
    client: Client,
    rpc_url: String,
    api_url: String,
}

impl RpcClient {
    pub fn new(rpc_url: &str, api_url: &str, timeout: Duration) -> Result<Self, RpcError> {
        let rpc_url = normalize_url(rpc_url);
        let api_url = normalize_url(api_url);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| RpcError::Transient {
                url: rpc_url.clone(),
                source,
            })?;

        debug!("Creating node client with RPC {} and API {}", rpc_url, api_url);
        Ok(RpcClient {
            client,
            rpc_url,
            api_url,
        })
    }

    /// Build a client and check the node answers `/status`.
    pub async fn connect(rpc_url: &str, api_url: &str, timeout: Duration) -> Result<Self, RpcError> {
        let client = Self::new(rpc_url, api_url, timeout)?;
        match client.status().await {
            Ok(status) => {
                info!(
                    "Connected to node at {}. Latest height: {}, catching up: {}",
                    client.rpc_url, status.latest_height, status.catching_up
                );
                Ok(client)
            }
            Err(e) => {
                error!("Failed to reach node at {}: {}", client.rpc_url, e);
                Err(e)
            }
        }
    }

    /// GET `url` and deserialize the JSON body.
    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T, RpcError> {
        debug!("Sending GET request to: {}", url);
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|source| RpcError::Transient {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!("Error response from {}: {} - {}", url, status, body);
            return Err(RpcError::Status {
                url: url.to_string(),
                status,
                body,
            });
        }

        let text = response.text().await.map_err(|source| RpcError::Transient {
            url: url.to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|e| RpcError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    async fn rpc_result<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, RpcError> {
        let url = format!("{}{}", self.rpc_url, path);
        let response: JsonRpcResponse<T> = self.get_json(&url, query).await?;
        match (response.result, response.error) {
            (Some(result), _) => Ok(result),
            (None, error) => Err(RpcError::Decode {
                url,
                reason: error.map_or_else(|| "missing result".to_string(), |e| e.to_string()),
            }),
        }
    }

    pub async fn status(&self) -> Result<NodeStatus, RpcError> {
        let status: StatusResult = self.rpc_result("/status", &[]).await?;
        Ok(NodeStatus {
            catching_up: status.sync_info.catching_up,
            latest_height: status.sync_info.latest_block_height,
        })
    }

    pub async fn block_header(&self, height: i64) -> Result<BlockHeader, RpcError> {
        let url = format!("{}/cosmos/base/tendermint/v1beta1/blocks/{}", self.api_url, height);
        let response: GetBlockResponse = self.get_json(&url, &[]).await?;
        Ok(response.block.header)
    }

    /// Every transaction at `height`, each joined with its response.
    pub async fn txs_at_height(&self, height: i64) -> Result<Vec<MergedTx>, RpcError> {
        let url = format!("{}/cosmos/tx/v1beta1/txs", self.api_url);
        let mut merged = Vec::new();
        loop {
            let query = [
                ("events", format!("tx.height={}", height)),
                ("pagination.limit", TX_PAGE_LIMIT.to_string()),
                ("pagination.offset", merged.len().to_string()),
                ("pagination.count_total", "true".to_string()),
            ];
            let page: GetTxsEventResponse = self.get_json(&url, &query).await?;
            if page.txs.len() != page.tx_responses.len() {
                return Err(RpcError::Decode {
                    url,
                    reason: format!(
                        "{} txs but {} tx responses at height {}",
                        page.txs.len(),
                        page.tx_responses.len(),
                        height
                    ),
                });
            }

            let fetched = page.txs.len();
            let total = page
                .pagination
                .as_ref()
                .map(|p| p.total)
                .filter(|t| *t > 0)
                .unwrap_or(page.total);
            merged.extend(
                page.txs
                    .into_iter()
                    .zip(page.tx_responses)
                    .map(|(tx, response)| MergedTx { tx, response }),
            );

            if fetched < TX_PAGE_LIMIT || merged.len() as i64 >= total {
                break;
            }
        }
        Ok(merged)
    }

    pub async fn block_results(&self, height: i64) -> Result<BlockResults, RpcError> {
        let raw: RawBlockResults = self
            .rpc_result("/block_results", &[("height", height.to_string())])
            .await?;
        normalize_block_results(raw).map_err(|reason| RpcError::Decode {
            url: format!("{}/block_results?height={}", self.rpc_url, height),
            reason,
        })
    }

    /// All contract addresses instantiated from `code_id`.
    pub async fn contracts_by_code_id(&self, code_id: u64) -> Result<Vec<String>, RpcError> {
        let url = format!("{}/cosmwasm/wasm/v1/code/{}/contracts", self.api_url, code_id);
        let mut contracts = Vec::new();
        let mut next_key: Option<String> = None;
        loop {
            let mut query = vec![("pagination.limit", TX_PAGE_LIMIT.to_string())];
            if let Some(key) = &next_key {
                query.push(("pagination.key", key.clone()));
            }
            let page: ContractsByCodeResponse = self.get_json(&url, &query).await?;
            contracts.extend(page.contracts);
            next_key = page
                .pagination
                .and_then(|p| p.next_key)
                .filter(|k| !k.is_empty());
            if next_key.is_none() {
                break;
            }
        }
        Ok(contracts)
    }

    pub async fn epochs(&self) -> Result<Vec<EpochInfo>, RpcError> {
        let url = format!("{}/osmosis/epochs/v1beta1/epochs", self.api_url);
        let response: EpochsResponse = self.get_json(&url, &[]).await?;
        Ok(response.epochs)
    }
}

/// Add a scheme when missing, drop a trailing slash and give scheme-only
/// URLs their default port.
pub fn normalize_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if !url.starts_with("http://") && !url.starts_with("https://") {
        url = format!("http://{}", url);
    }
    while url.ends_with('/') {
        url.pop();
    }

    let (scheme, rest) = url.split_once("://").unwrap_or(("http", url.as_str()));
    let (host, path) = match rest.find('/') {
        Some(i) => rest.split_at(i),
        None => (rest, ""),
    };
    let has_port = host
        .rsplit_once(':')
        .map_or(false, |(_, port)| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()));
    if has_port {
        return url;
    }
    let port = if scheme == "https" { 443 } else { 80 };
    format!("{}://{}:{}{}", scheme, host, port, path)
}

/// Split CometBFT 0.38 `finalize_block_events` back into begin and end block
/// lists using each event's `mode` attribute.
pub fn normalize_block_results(raw: RawBlockResults) -> Result<BlockResults, String> {
    let mut results = BlockResults {
        height: raw.height,
        begin_block_events: raw.begin_block_events.unwrap_or_default(),
        end_block_events: raw.end_block_events.unwrap_or_default(),
    };

    for mut event in raw.finalize_block_events.unwrap_or_default() {
        let begin = has_mode(&event, "BeginBlock");
        let end = has_mode(&event, "EndBlock");
        event.attributes.retain(|a| a.key != "mode");
        match (begin, end) {
            (true, false) => results.begin_block_events.push(event),
            (false, true) => results.end_block_events.push(event),
            (true, true) => return Err(format!("{} event is marked both BeginBlock and EndBlock", event.kind)),
            (false, false) => return Err(format!("{} event has no BeginBlock or EndBlock mode", event.kind)),
        }
    }
    Ok(results)
}

fn has_mode(event: &Event, mode: &str) -> bool {
    event.attributes.iter().any(|a| a.key == "mode" && a.value == mode)
}

/// True for status codes that mean the height is not there yet.
pub fn is_not_found(err: &RpcError) -> bool {
    matches!(err, RpcError::Status { status, .. } if *status == StatusCode::NOT_FOUND)
}

#[cfg(test)]
mod tests {
    use super::types::Attribute;
    use super::*;

    #[test]
    fn urls_get_scheme_and_default_port() {
        assert_eq!(normalize_url("localhost:26657/"), "http://localhost:26657");
        assert_eq!(normalize_url("https://rpc.osmosis.zone"), "https://rpc.osmosis.zone:443");
        assert_eq!(normalize_url("http://node"), "http://node:80");
        assert_eq!(normalize_url("https://lcd.example.com/api/"), "https://lcd.example.com:443/api");
    }

    fn event(kind: &str, mode: &[&str]) -> Event {
        let mut attributes = vec![Attribute::new("amount", "1uosmo")];
        attributes.extend(mode.iter().map(|m| Attribute::new("mode", *m)));
        Event::new(kind, attributes)
    }

    #[test]
    fn finalize_events_split_by_mode() {
        let raw = RawBlockResults {
            height: 10,
            finalize_block_events: Some(vec![
                event("distribution", &["BeginBlock"]),
                event("swap_transacted", &["EndBlock"]),
            ]),
            ..Default::default()
        };
        let results = normalize_block_results(raw).unwrap();
        assert_eq!(results.begin_block_events.len(), 1);
        assert_eq!(results.end_block_events[0].kind, "swap_transacted");
        assert_eq!(results.begin_block_events[0].attributes.len(), 1);
    }

    #[test]
    fn finalize_event_without_single_mode_is_rejected() {
        for mode in [vec![], vec!["BeginBlock", "EndBlock"]] {
            let raw = RawBlockResults {
                finalize_block_events: Some(vec![event("distribution", &mode)]),
                ..Default::default()
            };
            assert!(normalize_block_results(raw).is_err());
        }
    }
}
