use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

/// Solana JSON-RPC client bound to the first public endpoint that
/// answered a `getVersion` probe.
pub struct SolanaRpc {
    client: reqwest::Client,
    endpoint: Url,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// `getBalance` wraps the lamport count in a context envelope.
#[derive(Debug, Deserialize)]
struct BalanceResult {
    value: u64,
}

impl SolanaRpc {
    /// Walk the endpoint list in order, returning a client bound to the
    /// first one that answers a version probe.
    pub async fn connect(endpoints: &[String]) -> Result<Self> {
        let client = reqwest::Client::new();
        for raw in endpoints {
            let endpoint = match Url::parse(raw) {
                Ok(url) => url,
                Err(e) => {
                    warn!("Skipping invalid RPC endpoint {raw}: {e}");
                    continue;
                }
            };
            match Self::probe(&client, &endpoint).await {
                Ok(version) => {
                    debug!("Solana RPC ready at {endpoint} (solana-core {version})");
                    return Ok(Self { client, endpoint });
                }
                Err(e) => {
                    warn!("RPC endpoint {endpoint} unreachable, trying next: {e}");
                }
            }
        }
        anyhow::bail!("no Solana RPC endpoint answered")
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn probe(client: &reqwest::Client, endpoint: &Url) -> Result<String> {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": "getVersion" });
        let resp: serde_json::Value = client
            .post(endpoint.clone())
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let version = resp
            .pointer("/result/solana-core")
            .and_then(|v| v.as_str())
            .context("getVersion returned no solana-core field")?;
        Ok(version.to_string())
    }

    /// Lamport balance for the given base58 public key.
    pub async fn get_balance(&self, pubkey: &str) -> Result<u64> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getBalance",
            "params": [pubkey],
        });
        let resp: RpcResponse<BalanceResult> = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("malformed getBalance response")?;
        extract_balance(resp)
    }
}

fn extract_balance(resp: RpcResponse<BalanceResult>) -> Result<u64> {
    if let Some(err) = resp.error {
        anyhow::bail!("getBalance failed: {} (code {})", err.message, err.code);
    }
    resp.result
        .map(|r| r.value)
        .context("getBalance returned neither result nor error")
}
