//! Plan store server runtime: listener, store, graceful shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::info;

use crate::routes::{router, ApiState};
use crate::sqlite::SqliteStore;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeConfig {
    pub port: u16,
    pub bind: String,
    pub db: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("open plan store at {path}: {source}")]
    OpenStore {
        path: PathBuf,
        #[source]
        source: kasmos_store::StoreError,
    },
    #[error("bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {source}")]
    Serve {
        #[source]
        source: std::io::Error,
    },
}

/// Starts the plan store HTTP server and runs until interrupted. On SIGINT
/// the listener stops accepting and in-flight requests get a 5-second drain
/// window.
pub async fn run(config: ServeConfig) -> Result<(), ServeError> {
    if let Some(parent) = config.db.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| ServeError::OpenStore {
                path: config.db.clone(),
                source: source.into(),
            })?;
        }
    }
    let store = SqliteStore::open(&config.db).map_err(|source| ServeError::OpenStore {
        path: config.db.clone(),
        source,
    })?;

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServeError::Bind {
            addr: addr.clone(),
            source,
        })?;
    info!(addr = %addr, db = %config.db.display(), "plan store listening");

    run_with_listener(listener, ApiState::new(store), shutdown_signal()).await
}

/// Server loop split out so tests can drive it with their own listener and
/// shutdown trigger.
pub async fn run_with_listener(
    listener: TcpListener,
    state: ApiState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), ServeError> {
    let notify = Arc::new(Notify::new());
    let drain = notify.clone();

    let server = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { drain.notified().await });
    let mut handle = tokio::spawn(async move { server.await });

    tokio::select! {
        result = &mut handle => {
            match result {
                Ok(result) => result.map_err(|source| ServeError::Serve { source }),
                Err(join) => Err(ServeError::Serve {
                    source: std::io::Error::other(join),
                }),
            }
        }
        _ = shutdown => {
            info!("shutting down");
            notify.notify_waiters();
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(result)) => result.map_err(|source| ServeError::Serve { source }),
                Ok(Err(join)) => Err(ServeError::Serve {
                    source: std::io::Error::other(join),
                }),
                // Drain window expired; in-flight requests are abandoned.
                Err(_elapsed) => Ok(()),
            }
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
