//! Bridge composition root.
//!
//! The single place where the session store, AI-leg connector, agent, and
//! connection registry are instantiated and wired together, so every
//! dependency relationship is visible in one place rather than scattered
//! across `bridge-server`'s `main.rs`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::WsConnectionManager;

/// Container for the bridge's bootstrapped services: everything
/// `bridge-server`'s `main.rs` needs to build the router and run it to
/// completion.
pub struct BridgeBootstrap {
    pub app_state: crate::api::BridgeAppState,
    /// Cancels the background session-cleanup sweep on shutdown.
    cleanup_cancel: CancellationToken,
}

impl BridgeBootstrap {
    /// Cancels background tasks. The HTTP server itself is stopped by the
    /// caller (e.g. on a shutdown signal); this only tears down bridge-core's
    /// own sweep task.
    pub fn shutdown(&self) {
        log::info!("[Bootstrap] Stopping session cleanup sweep");
        self.cleanup_cancel.cancel();
    }
}

/// Builds the session storage backend selected by [`crate::config::Config::storage_backend`].
async fn build_storage(
    config: &crate::config::Config,
) -> crate::error::BridgeResult<Arc<dyn crate::session::SessionStorage>> {
    use crate::config::StorageBackend;
    use crate::session::{MemoryStorage, RedisStorage};

    match config.storage_backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStorage::new(
            10_000,
            config.session_cleanup_interval(),
        ))),
        StorageBackend::Redis => {
            let url = config.storage_url.as_deref().ok_or_else(|| {
                crate::error::BridgeError::Configuration(
                    "storage_backend is redis but storage_url is unset".to_string(),
                )
            })?;
            let storage =
                RedisStorage::connect(url, "bridge:session:", config.max_session_age_seconds)
                    .await?;
            Ok(Arc::new(storage))
        }
    }
}

/// Bootstraps the telephony bridge's services. Wiring order:
///
/// 1. Session storage (depends on `storage_backend` selection)
/// 2. Session manager (depends on storage)
/// 3. AI-service leg connector (live or local, per `use_local_ai`)
/// 4. Agent (session parameters + function registry)
/// 5. Connection registry (`WsConnectionManager`)
/// 6. Background session-cleanup sweep
pub async fn bootstrap_bridge(
    config: &crate::config::Config,
) -> crate::error::BridgeResult<BridgeBootstrap> {
    let storage = build_storage(config).await?;
    let session_manager = Arc::new(crate::session::SessionManager::new(storage));

    let ai_connector: Arc<dyn crate::ai_leg::AiLegConnector> = if config.use_local_ai {
        Arc::new(crate::ai_leg::LocalAiLegConnector)
    } else {
        let url = format!("{}?model={}", config.ai_service_url, config.ai_model_id);
        Arc::new(crate::ai_leg::LiveAiLegConnector::new(url))
    };

    let agent: Arc<dyn crate::agent::Agent> =
        Arc::new(crate::agent::VoiceBotAgent::new(Arc::new(config.clone())));

    let data_dir = config
        .data_dir
        .clone()
        .unwrap_or_else(|| std::path::PathBuf::from("./data/calls"));

    let adapter_deps = crate::adapters::AdapterDeps {
        session_manager: session_manager.clone(),
        ai_connector,
        agent,
        data_dir,
        bot_source_rate: 24_000,
        commit_min_bytes: config.commit_min_bytes,
        max_session_age: config.max_session_age(),
        initial_greeting: "Greet the caller warmly and ask how you can help.".to_string(),
    };

    let ws_manager = Arc::new(WsConnectionManager::new());

    let cleanup_cancel = CancellationToken::new();
    let cleanup_interval = config.session_cleanup_interval();
    let max_age = config.max_session_age();
    let sweep_manager = session_manager.clone();
    let sweep_cancel = cleanup_cancel.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = sweep_cancel.cancelled() => break,
                _ = interval.tick() => {
                    match sweep_manager.cleanup_expired(max_age).await {
                        Ok(0) => {}
                        Ok(n) => log::info!("[Bootstrap] cleanup sweep evicted {n} expired session(s)"),
                        Err(e) => log::warn!("[Bootstrap] cleanup sweep failed: {e}"),
                    }
                }
            }
        }
    });

    Ok(BridgeBootstrap {
        app_state: crate::api::BridgeAppState {
            adapter_deps,
            ws_manager,
        },
        cleanup_cancel,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn bootstrap_with_defaults_uses_in_memory_storage_and_local_ai() {
        let mut config = Config::default();
        config.use_local_ai = true;

        let bootstrap = bootstrap_bridge(&config).await.unwrap();
        assert_eq!(bootstrap.app_state.ws_manager.connection_count(), 0);
        bootstrap.shutdown();
    }

    #[tokio::test]
    async fn bootstrap_rejects_redis_backend_without_storage_url() {
        let mut config = Config::default();
        config.storage_backend = crate::config::StorageBackend::Redis;
        config.storage_url = None;

        let result = bootstrap_bridge(&config).await;
        assert!(result.is_err());
    }
}
