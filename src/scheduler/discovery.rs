//! Server address discovery.
//!
//! `AddressCache` holds the server address the worker currently believes is
//! authoritative. The discovery loop asks the bootstrap server for a fresher
//! one on every tick and swaps it in; readers never block.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::ServerApi;

/// Single-writer, multi-reader snapshot of the current server address.
pub struct AddressCache {
    current: ArcSwap<String>,
}

impl AddressCache {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial.into()),
        }
    }

    pub fn current(&self) -> String {
        self.current.load().as_ref().clone()
    }

    pub fn store(&self, address: impl Into<String>) {
        self.current.store(Arc::new(address.into()));
    }
}

pub struct Discovery {
    api: Arc<dyn ServerApi>,
    cache: Arc<AddressCache>,
    bootstrap: String,
    app_id: i64,
    client_version: String,
    interval: Duration,
}

impl Discovery {
    pub fn new(
        api: Arc<dyn ServerApi>,
        cache: Arc<AddressCache>,
        bootstrap: impl Into<String>,
        app_id: i64,
        client_version: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            api,
            cache,
            bootstrap: bootstrap.into(),
            app_id,
            client_version: client_version.into(),
            interval,
        }
    }

    /// One resolution attempt. Errors keep the previous address.
    pub async fn refresh(&self) {
        let current = self.cache.current();
        match self
            .api
            .acquire(&self.bootstrap, self.app_id, &current, &self.client_version)
            .await
        {
            Ok(address) if address.is_empty() => {
                debug!("Discovery returned an empty address, keeping {current}");
            }
            Ok(address) => {
                if address != current {
                    info!(from = %current, to = %address, "Server address changed");
                }
                self.cache.store(address);
            }
            Err(e) => {
                warn!(error = %e, current = %current, "Server discovery failed");
            }
        }
    }

    /// Spawn the discovery loop. The first refresh happens one interval in.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // Skip immediate first tick
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = self.refresh() => {}
                        }
                    }
                }
            }
            debug!("Discovery loop stopped");
        })
    }
}
