use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use serde::Serialize;

use crate::broadcast::broadcast_hub::BroadcastHub;
use crate::configuration::config::Config;
use crate::configuration::types::{LifecyclePolicy, ProxyEndpoint};
use crate::controller::system_proxy::{DisabledSystemProxy, SystemProxy};
use crate::data_capture::capture_adapter::CaptureAdapter;
use crate::data_capture::scheduler::HostScheduler;
use crate::engine::forward_proxy::ForwardProxyEngine;
use crate::engine::types::InterceptionEngine;
use crate::error_handling::types::{ControllerError, StorageError};
use crate::lifecycle::lifecycle_manager::LifecycleManager;
use crate::storage::database_storage::DatabaseStorage;
use crate::storage::storage_trait::ExchangeStore;
use crate::storage::types::{Exchange, ExchangeQuery, StatsSnapshot};

/// How long `shutdown` waits for scheduled saves and broadcasts.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of a capture start/stop request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureToggle {
    pub success: bool,
    pub proxy_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureStatus {
    pub proxy_running: bool,
    pub proxy_host: String,
    pub proxy_port: u16,
}

/// Construction-time settings for a [`Supervisor`].
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub endpoint: ProxyEndpoint,
    pub policy: LifecyclePolicy,
    /// Toggle the OS proxy settings around capture runs
    pub manage_system_proxy: bool,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            endpoint: ProxyEndpoint::default(),
            policy: LifecyclePolicy::default(),
            manage_system_proxy: false,
        }
    }
}

pub struct Supervisor {
    store: Arc<dyn ExchangeStore>,
    hub: Arc<BroadcastHub>,
    scheduler: HostScheduler,
    adapter: Arc<CaptureAdapter>,
    lifecycle: LifecycleManager,
    system_proxy: Arc<dyn SystemProxy>,
    options: SupervisorOptions,
}

impl Supervisor {
    /// Builds the full stack from command-line configuration, with the
    /// built-in forward proxy as engine.
    pub async fn from_config(config: &Config) -> Result<Self, ControllerError> {
        let storage_config = config.storage_config()?;
        let storage = DatabaseStorage::connect(&storage_config).await?;
        info!("Connected to {:?} storage", storage.db_type());
        let options = SupervisorOptions {
            endpoint: config.proxy_endpoint(),
            policy: config.lifecycle_policy(),
            manage_system_proxy: config.system_proxy,
        };
        Self::new(
            Arc::new(storage),
            Arc::new(ForwardProxyEngine::default()),
            Arc::new(DisabledSystemProxy),
            options,
        )
        .await
    }

    /// Wires the components together and initializes storage. Must be called
    /// from within the host runtime.
    pub async fn new(
        store: Arc<dyn ExchangeStore>,
        engine: Arc<dyn InterceptionEngine>,
        system_proxy: Arc<dyn SystemProxy>,
        options: SupervisorOptions,
    ) -> Result<Self, ControllerError> {
        store.init().await?;

        let scheduler = HostScheduler::current()
            .map_err(|e| ControllerError::InitializationFailed(e.to_string()))?;
        let hub = Arc::new(BroadcastHub::new());
        let adapter = Arc::new(CaptureAdapter::new(
            store.clone(),
            hub.clone(),
            scheduler.clone(),
        ));
        let lifecycle = LifecycleManager::new(engine, options.policy);

        info!("Supervisor ready, default capture endpoint {}", options.endpoint);
        Ok(Self {
            store,
            hub,
            scheduler,
            adapter,
            lifecycle,
            system_proxy,
            options,
        })
    }

    /// Live feed subscribers register here.
    pub fn hub(&self) -> Arc<BroadcastHub> {
        self.hub.clone()
    }

    pub async fn list_exchanges(
        &self,
        limit: u64,
        offset: u64,
        query: Option<&str>,
    ) -> Result<Vec<Exchange>, StorageError> {
        let mut request = ExchangeQuery::page(limit, offset);
        if let Some(text) = query {
            request = request.search(text);
        }
        self.store.query(&request).await
    }

    pub async fn get_stats(&self) -> Result<StatsSnapshot, StorageError> {
        self.store.stats().await
    }

    /// Deletes all history, then tells live views to reset.
    pub async fn clear_all(&self) -> Result<(), StorageError> {
        self.store.clear_all().await?;
        self.hub.publish_clear().await;
        Ok(())
    }

    pub async fn start_capture(&self, host: Option<String>, port: Option<u16>) -> CaptureToggle {
        let endpoint = ProxyEndpoint {
            host: host.unwrap_or_else(|| self.options.endpoint.host.clone()),
            port: port.unwrap_or(self.options.endpoint.port),
        };

        self.lifecycle.start(endpoint.clone(), self.adapter.clone()).await;
        let running = self.lifecycle.is_running();
        if !running {
            error!("Capture could not be started on {}", endpoint);
            return CaptureToggle {
                success: false,
                proxy_running: false,
                error: Some(format!("capture engine failed to start on {}", endpoint)),
            };
        }

        if self.options.manage_system_proxy {
            let (host, port) = self.client_facing();
            if !self.system_proxy.set_system_proxy(true, &host, port) {
                warn!("System proxy was not enabled for {}:{}", host, port);
            }
        }
        CaptureToggle {
            success: true,
            proxy_running: true,
            error: None,
        }
    }

    pub async fn stop_capture(&self) -> CaptureToggle {
        let (host, port) = self.client_facing();
        self.lifecycle.stop().await;
        if self.options.manage_system_proxy {
            self.system_proxy.set_system_proxy(false, &host, port);
        }
        CaptureToggle {
            success: true,
            proxy_running: self.lifecycle.is_running(),
            error: None,
        }
    }

    pub fn is_capture_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    /// Address the running engine is bound to, once it reported ready.
    pub fn listening_addr(&self) -> Option<SocketAddr> {
        self.lifecycle.bound_addr()
    }

    pub fn status(&self) -> CaptureStatus {
        let endpoint = self
            .lifecycle
            .endpoint()
            .unwrap_or_else(|| self.options.endpoint.clone());
        CaptureStatus {
            proxy_running: self.lifecycle.is_running(),
            proxy_host: endpoint.host,
            proxy_port: self.listening_addr().map_or(endpoint.port, |a| a.port()),
        }
    }

    /// Waits for scheduled capture actions to finish.
    pub async fn flush(&self, timeout: Duration) -> bool {
        self.scheduler.drain(timeout).await
    }

    /// Stops capture and lets pending saves land.
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.stop_capture().await;
        self.flush(DRAIN_TIMEOUT).await;
    }

    /// Host and port clients should use; wildcard listen hosts map to loopback.
    fn client_facing(&self) -> (String, u16) {
        let status = self.status();
        let host = match status.proxy_host.as_str() {
            "0.0.0.0" | "::" | "" => "127.0.0.1".to_string(),
            other => other.to_string(),
        };
        (host, status.proxy_port)
    }
}
