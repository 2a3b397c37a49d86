//! `keygate serve`: HTTP server plus expiry reaper.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::KeygateConfig;
use crate::device::{
    AuthorizationStore, DeviceAuthService, ExpiryReaper, FileAuthorizationStore,
    MemoryAuthorizationStore,
};
use crate::error::Result;

pub async fn handle_serve(
    config: &KeygateConfig,
    in_memory: bool,
    with_approval: bool,
) -> Result<()> {
    let store: Arc<dyn AuthorizationStore> = if in_memory {
        Arc::new(MemoryAuthorizationStore::new())
    } else {
        info!(dir = %config.store_dir.display(), "using file store");
        Arc::new(FileAuthorizationStore::new(&config.store_dir))
    };

    let service =
        Arc::new(DeviceAuthService::new(store.clone()).with_settings(config.flow_settings()));
    let shutdown = CancellationToken::new();
    let reaper = ExpiryReaper::new(store)
        .with_retention(config.retention)
        .with_period(config.reap_interval)
        .spawn(shutdown.child_token());

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
        }
        signal.cancel();
    });

    let served = crate::server::serve(config, service, with_approval, shutdown.clone()).await;
    ExpiryReaper::stop(&shutdown, reaper).await;
    served
}
