use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;
use tracing::{info, warn};

use crate::error::{BrightError, Result};

const FORWARD_TIMEOUT: Duration = Duration::from_secs(10);

/// Headers preserved when relaying a request to the leader
const FORWARDED_HEADERS: [&str; 2] = ["authorization", "content-type"];

/// A mutation captured on a follower for replay against the leader
#[derive(Clone, Debug)]
pub struct ForwardedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// The leader's verbatim response
#[derive(Clone, Debug)]
pub struct ForwardedResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// HTTP client for node-to-node calls: transparent leader forwarding and
/// cluster join requests.
pub struct RpcClient {
    client: reqwest::Client,
}

impl RpcClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(FORWARD_TIMEOUT)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| BrightError::Internal(format!("failed to build http client: {}", e)))?;
        Ok(Self { client })
    }

    /// Replay a request against the leader's HTTP address and return its
    /// response verbatim.
    pub async fn forward_request(
        &self,
        leader_http_addr: &str,
        request: &ForwardedRequest,
    ) -> Result<ForwardedResponse> {
        let mut url = format!("http://{}{}", leader_http_addr, request.path);
        if let Some(query) = &request.query {
            url.push('?');
            url.push_str(query);
        }

        let method: reqwest::Method = request
            .method
            .parse()
            .map_err(|_| BrightError::InvalidArgument(format!("bad method {}", request.method)))?;

        let mut builder = self.client.request(method, &url);
        for name in FORWARDED_HEADERS {
            if let Some(value) = request.headers.get(name) {
                builder = builder.header(name, value);
            }
        }

        let started = std::time::Instant::now();
        let response = builder
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| BrightError::Consensus(format!("failed to forward request: {}", e)))?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                Some((name.as_str().to_string(), value.to_str().ok()?.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| BrightError::Consensus(format!("failed to read leader response: {}", e)))?
            .to_vec();

        info!(
            status,
            latency_ms = started.elapsed().as_millis() as u64,
            path = %request.path,
            leader = %leader_http_addr,
            "forwarded request to leader"
        );

        Ok(ForwardedResponse {
            status,
            headers,
            body,
        })
    }

    /// Ask a peer to add this node to the cluster. The peer forwards the
    /// call to its leader, which appends the membership change.
    pub async fn cluster_join(
        &self,
        peer_http_addr: &str,
        node_id: u64,
        advertise_addr: &str,
        master_key: Option<&str>,
    ) -> Result<()> {
        let url = format!("http://{}/cluster/join", peer_http_addr);

        let mut builder = self.client.post(&url).json(&json!({
            "node_id": node_id,
            "addr": advertise_addr,
        }));
        if let Some(key) = master_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| BrightError::Consensus(format!("failed to contact peer: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(peer = %peer_http_addr, %status, body = %body, "join request rejected");
            return Err(BrightError::Consensus(format!(
                "join request failed with status {}: {}",
                status, body
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_headers_are_lowercase() {
        // reqwest normalizes header names to lowercase; the allowlist has
        // to match or the Authorization header silently drops.
        for name in FORWARDED_HEADERS {
            assert_eq!(name, name.to_lowercase());
        }
    }
}
