//! Publish/subscribe example using the in-memory transport.
//!
//! A status publisher and a typed subscriber share one process-global memory
//! hub. A second, raw subscriber on the same topic prints the declared type of
//! everything that arrives.
//!
//! Run with: RUST_LOG=meshbus=debug cargo run --example pubsub_memory --features logging

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use meshbus::{create_memory_factory, Envelope, Message, Publisher, Qos, Result, SharedSession, Subscription};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt as tracing_format, EnvFilter};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JointState {
    // ---
    joint: String,
    position: f64,
    velocity: f64,
}

impl Message for JointState {
    fn type_name() -> &'static str {
        "robot.JointState"
    }
}

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
        .config_document(serde_json::json!({
            "mode": "peer",
            "listen": { "endpoints": ["tcp/0.0.0.0:7447"] }
        }))
        .strip_listen_endpoints(true)
        .build()?;
    let session = shared.acquire()?;

    let typed = Subscription::new(
        &session,
        "/arm/joint_states",
        Qos::Reliable,
        |state: JointState| {
            println!("{:>8}: pos {:+.3} vel {:+.3}", state.joint, state.position, state.velocity);
        },
        |raw, err| eprintln!("dropping {} byte message: {err}", raw.len()),
    )
    .await?;

    let raw = Subscription::new_raw(
        &session,
        "/arm/joint_states",
        Qos::Reliable,
        |envelope: Envelope| println!("  (raw) {} at {:?}", envelope.payload.type_name, envelope.publish_time),
        |_raw, err| eprintln!("undecodable envelope: {err}"),
    )
    .await?;

    let publisher = Publisher::new(&session, "/arm/joint_states", Qos::Reliable).await?;
    println!("subscribers present: {}", publisher.has_matching_subscribers().await?);

    for (i, joint) in ["shoulder", "elbow", "wrist"].iter().enumerate() {
        let state = JointState {
            joint: joint.to_string(),
            position: 0.25 * i as f64,
            velocity: -0.1 * i as f64,
        };
        publisher.publish(&state).await?;
    }

    tokio::time::sleep(Duration::from_millis(100)).await;

    publisher.close().await?;
    raw.close().await?;
    typed.close().await?;
    shared.release();

    Ok(())
}
