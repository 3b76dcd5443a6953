//! Key-value example using the in-memory transport.
//!
//! Stores a few robot configurations, reads one back, lists them all with a
//! wildcard query and deletes one.
//!
//! Run with: RUST_LOG=meshbus=debug cargo run --example kv_memory --features logging

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use meshbus::{create_memory_factory, Error, KvStore, Message, Result, SharedSession};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing_subscriber::{fmt as tracing_format, EnvFilter};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RobotConfig {
    // ---
    name: String,
    max_speed: f64,
}

impl Message for RobotConfig {}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_format()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_line_number(true)
        .init();

    let shared = SharedSession::builder()
        .factory_ptr(create_memory_factory())
        .config_document(serde_json::json!({ "mode": "client" }))
        .build()?;
    let session = shared.acquire()?;
    let store = KvStore::new(&session);

    for (id, max_speed) in [("r1", 1.5), ("r2", 0.8), ("r3", 2.0)] {
        let config = RobotConfig {
            name: id.to_string(),
            max_speed,
        };
        // High consistency: returns once the value can be read back.
        store.set(&format!("robots/{id}/config"), &config, true).await?;
    }

    let r2: RobotConfig = store.get("/robots/r2/config", Some(Duration::from_secs(1))).await?;
    println!("read back {r2:?}");

    let (done_tx, done_rx) = oneshot::channel();
    let handle = store
        .get_all(
            "robots/*/config",
            |payload| match payload.unpack::<RobotConfig>() {
                Ok(config) => println!("  {} -> {} m/s", config.name, config.max_speed),
                Err(err) => eprintln!("  skipping value: {err}"),
            },
            |key, raw, err| eprintln!("  {key}: {} undecodable bytes ({err})", raw.len()),
            move |selector| {
                let _ = done_tx.send(selector);
            },
        )
        .await?;
    let selector = done_rx.await.map_err(|_| Error::QueryAborted)?;
    println!("listed {selector}");
    handle.close().await?;

    store.delete("robots/r3/config").await?;
    match store.get::<RobotConfig>("robots/r3/config", None).await {
        Err(Error::NotFound) => println!("r3 deleted"),
        other => println!("unexpected: {other:?}"),
    }

    shared.release();
    Ok(())
}
