//! Common test utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::Client;
use skiff_datalog::{HttpClient, RetryPolicy};
use skiff_runtime::{DefaultContextFactory, Dispatcher, HandlerRouter, SharedResources};
use skiff_server::{Server, ServerConfig};
use tokio::time::timeout;

/// A running server bound to a random local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: Client,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a server dispatching to `router`.
    pub async fn start(router: HandlerRouter) -> Result<Self> {
        let addr = find_available_port().await?;

        let resources = SharedResources::new(HttpClient::new(Duration::from_secs(5))?)
            .with_retry_policy(RetryPolicy::none());
        let dispatcher = Dispatcher::new(
            Arc::new(router),
            Arc::new(DefaultContextFactory::new(resources)),
        );
        let server = Server::new(dispatcher, ServerConfig::new().with_bind_address(addr));
        let handle = tokio::spawn(async move {
            let _ = server.run().await;
        });

        let client = Client::new();
        wait_for_server(&client, addr).await?;

        Ok(Self {
            addr,
            client,
            _handle: handle,
        })
    }

    /// Get the base URL for the server.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// POST a JSON payload to the intake route.
    pub async fn post_payload(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        Ok(self
            .client
            .post(format!("{}/", self.base_url()))
            .json(body)
            .send()
            .await?)
    }
}

/// Find an available port for the test server.
async fn find_available_port() -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr)
}

/// Wait for the server to become ready.
async fn wait_for_server(client: &Client, addr: SocketAddr) -> Result<()> {
    let url = format!("http://{}/health", addr);

    let result = timeout(Duration::from_secs(5), async {
        loop {
            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => return,
                _ => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
    })
    .await;

    match result {
        Ok(()) => Ok(()),
        Err(_) => anyhow::bail!("Timeout waiting for server to start"),
    }
}
