// HTTP gateway forum client — reads plebbit records through an IPFS gateway.
//
// Forum records are resolved by polling `/ipns/{address}`; pages and
// comments are immutable and fetched from `/ipfs/{cid}`. Each subscribed
// forum gets its own polling task that only emits a snapshot when the
// record's `updatedAt` moves.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::client::{ForumClient, ForumHandle};
use super::types::{CommentIpfs, Page, SubplebbitSnapshot};

/// Default public gateway.
pub const DEFAULT_GATEWAY_URL: &str = "https://ipfsgateway.xyz";

/// Snapshots buffered per forum before new ones are dropped.
const SNAPSHOT_BUFFER: usize = 4;

/// Thin reqwest wrapper over an IPFS HTTP gateway. Cheap to clone.
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
}

impl GatewayClient {
    pub fn new(base_url: &str, poll_interval: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("spamward/0.1 (plebbit-indexer)")
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_interval,
        })
    }

    /// GET a gateway path and deserialize the JSON body.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);

        debug!(path = path, "Gateway GET request");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Gateway request failed: {path}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Gateway returned {status} for {path}: {body}");
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to parse gateway response for {path}"))
    }

    pub async fn resolve_subplebbit(&self, address: &str) -> Result<SubplebbitSnapshot> {
        self.get_json(&format!("/ipns/{address}"))
            .await
            .with_context(|| format!("Failed to resolve subplebbit {address}"))
    }
}

#[async_trait]
impl ForumClient for GatewayClient {
    async fn get_subplebbit(&self, address: &str) -> Result<Box<dyn ForumHandle>> {
        Ok(Box::new(GatewayForumHandle {
            address: address.to_string(),
            client: self.clone(),
            stop_tx: None,
            task: None,
        }))
    }

    async fn get_page(&self, subplebbit_address: &str, page_cid: &str) -> Result<Page> {
        self.get_json(&format!("/ipfs/{page_cid}"))
            .await
            .with_context(|| format!("Failed to fetch page {page_cid} of {subplebbit_address}"))
    }

    async fn get_comment(&self, cid: &str) -> Result<CommentIpfs> {
        self.get_json(&format!("/ipfs/{cid}"))
            .await
            .with_context(|| format!("Failed to fetch comment {cid}"))
    }
}

/// One forum's IPNS polling loop.
pub struct GatewayForumHandle {
    address: String,
    client: GatewayClient,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl ForumHandle for GatewayForumHandle {
    fn address(&self) -> &str {
        &self.address
    }

    async fn update(&mut self) -> Result<mpsc::Receiver<SubplebbitSnapshot>> {
        if self.task.is_some() {
            anyhow::bail!("Update loop already running for {}", self.address);
        }

        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        let (stop_tx, stop_rx) = oneshot::channel();
        let client = self.client.clone();
        let address = self.address.clone();

        info!(address = %address, interval_secs = client.poll_interval.as_secs(), "Polling subplebbit");
        self.task = Some(tokio::spawn(poll_loop(client, address, tx, stop_rx)));
        self.stop_tx = Some(stop_tx);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            // The loop may already have exited on its own; nothing to signal then.
            let _ = stop_tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.await
                .with_context(|| format!("Polling task for {} panicked", self.address))?;
        }
        Ok(())
    }
}

async fn poll_loop(
    client: GatewayClient,
    address: String,
    tx: mpsc::Sender<SubplebbitSnapshot>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(client.poll_interval);
    let mut last_sent: Option<i64> = None;

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            _ = ticker.tick() => {
                let snapshot = match client.resolve_subplebbit(&address).await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        warn!(address = %address, error = %e, "Subplebbit poll failed");
                        continue;
                    }
                };

                if last_sent.is_some() && snapshot.updated_at == last_sent {
                    continue;
                }

                let updated_at = snapshot.updated_at;
                match tx.try_send(snapshot) {
                    Ok(()) => last_sent = updated_at,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!(address = %address, "Snapshot buffer full, dropping update");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        }
    }

    debug!(address = %address, "Polling stopped");
}
