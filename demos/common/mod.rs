//! Shared plumbing for the demo programs.
#![allow(dead_code)]

use std::sync::Arc;

use news_rpc::MemoryStorage;
use tracing_subscriber::EnvFilter;

/// Records served when `NEWS_SEED` is not set.
pub const SAMPLE_NEWS: &str = r#"[
    {"id": 1, "header": "Storage process online", "date": "2006-01-02"},
    {"id": 2, "header": "Web tier reaches storage over the bus", "date": "2006-01-03"},
    {"id": 123, "header": "header", "date": "2006-01-02"}
]"#;

/// Log to stderr, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    // ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Seed storage from the JSON file named by `NEWS_SEED`, or the built-in sample.
pub fn load_storage() -> anyhow::Result<Arc<MemoryStorage>> {
    // ---
    let json = match std::env::var("NEWS_SEED") {
        Ok(path) => std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read {path}: {e}"))?,
        Err(_) => SAMPLE_NEWS.to_string(),
    };
    Ok(Arc::new(MemoryStorage::from_json(&json)?))
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() -> anyhow::Result<()> {
    // ---
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}
