//! Composition root for a deployable marketplace core
//!
//! Wires the file-backed ledger store, the RPC chain observer and the
//! default key provider into a [`TaskManager`] from [`Settings`].

use std::sync::Arc;

use tracing::info;

use crate::EscrowResult;
use crate::keys::RandomKeyProvider;
use crate::observer::{RpcChainObserver, RpcObserverConfig};
use crate::settings::Settings;
use crate::store::JsonFileStore;
use crate::task_manager::{TaskManager, TaskManagerConfig};

/// One fully wired marketplace core
pub struct MarketplaceNode {
    manager: Arc<TaskManager>,
}

impl MarketplaceNode {
    /// Build a node from settings, hydrating ledger state from disk
    pub fn open(settings: &Settings) -> EscrowResult<Self> {
        let store = Arc::new(JsonFileStore::new(&settings.data_dir)?);
        let observer = Arc::new(RpcChainObserver::new(RpcObserverConfig {
            rpc_url: settings.rpc_url.clone(),
        }));
        let manager = TaskManager::new(
            TaskManagerConfig {
                fee_bps: settings.fee_bps,
                ..TaskManagerConfig::default()
            },
            store,
            observer,
            Arc::new(RandomKeyProvider),
        )?;

        info!("marketplace core ready (data dir: {})", settings.data_dir);

        Ok(Self {
            manager: Arc::new(manager),
        })
    }

    pub fn manager(&self) -> Arc<TaskManager> {
        Arc::clone(&self.manager)
    }
}

/// Install the default tracing subscriber for a standalone deployment
pub fn init_tracing() {
    tracing_subscriber::fmt::init();
}
