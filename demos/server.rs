//! Runnable configuration-repository server over the engine's HTTP/JSON API.
//!
//! Configuration comes from `DOGMA_CONFIG` (a path to a JSON config file) or
//! falls back to defaults: file-backed storage under `./dogma_data`, no
//! encryption at rest, listening on port 36462.
//!
//! Quick test (two terminals):
//! A) Start the server:
//! ```bash
//! cargo run --example server
//! ```
//! B) Create a project and a repository, push a file, then watch it:
//! ```bash
//! curl -s -XPOST localhost:36462/api/v1/projects -d '{"name":"p1"}' -H 'content-type: application/json'
//! curl -s -XPOST localhost:36462/api/v1/projects/p1/repos -d '{"name":"r1"}' -H 'content-type: application/json'
//! curl -s -XPOST 'localhost:36462/api/v1/projects/p1/repos/r1/contents?revision=head' \
//!     -H 'content-type: application/json' \
//!     -d '{"commitMessage":{"summary":"add a.json"},"changes":[{"path":"/a.json","type":"UPSERT_JSON","content":{"x":1}}]}'
//! curl -s 'localhost:36462/api/v1/projects/p1/repos/r1/files/a.json'
//! # Blocks until the next commit touches a.json, or 10 seconds pass (304):
//! curl -i 'localhost:36462/api/v1/projects/p1/repos/r1/contents/a.json?lastKnownRevision=1&timeoutMillis=10000'
//! ```

use std::sync::Arc;

use dogma_internal::config::DogmaConfig;
use dogma_internal::internal::command::CommandApplier;
use dogma_internal::internal::registry::ProjectRegistry;
use dogma_internal::protocol::{AppState, router};

fn load_config() -> DogmaConfig {
    let Ok(path) = std::env::var("DOGMA_CONFIG") else {
        return DogmaConfig::default();
    };
    match std::fs::read_to_string(&path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("invalid config at {path}: {e}");
                std::process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("cannot read config at {path}: {e}");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dogma_internal=debug".into()),
        )
        .init();

    let config = load_config();
    let bind_addr = config.server.bind_addr.clone();

    let registry = Arc::new(ProjectRegistry::new(config));
    let applier = CommandApplier::start(registry.clone());
    let app = router(AppState {
        registry: registry.clone(),
        applier: applier.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&bind_addr).await.unwrap();
    tracing::info!(addr = %bind_addr, "configuration repository listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .unwrap();

    // Refuse new commands, cancel watchers, flush the cache.
    applier.stop().await;
}
