//! Shared test utilities for provider integration tests
#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use url::Url;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn url(scheme: &str, addr: SocketAddr, path: &str) -> Url {
    format!("{}://{}{}", scheme, addr, path)
        .parse()
        .expect("valid test url")
}

/// Yield to the runtime until `condition` holds, panicking after a few seconds
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {}", what);
}
