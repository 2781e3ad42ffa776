//! Trellis Embedding SDK
//!
//! Integrate the Trellis component runtime into Rust applications.

pub use trellis_core;

pub use trellis_core::runtime::ComponentRuntime;

/// Initialize the Trellis runtime: install the tracing subscriber
/// (filterable via `RUST_LOG`) and hand back the composition root.
pub fn init() -> anyhow::Result<ComponentRuntime> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;
    tracing::debug!("trellis runtime initialized");
    Ok(ComponentRuntime::new())
}

/// Build a runtime without touching global logging, for hosts that own
/// their own subscriber.
pub fn init_without_logging() -> ComponentRuntime {
    ComponentRuntime::new()
}
