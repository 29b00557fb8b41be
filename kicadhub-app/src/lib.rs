//! Headless session host for KiCad Hub: loads settings, keeps the symbol and
//! footprint indexes fresh while libraries change on disk, and runs scheduled
//! backups until interrupted.

pub mod host;
pub mod state;
pub mod watcher;
pub mod workers;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use kicadhub::SettingsStore;
use tracing_subscriber::EnvFilter;

pub use host::Host;
pub use state::{AppContext, AppEvent};

/// Settings file location: `KICADHUB_SETTINGS`, else the per-user default.
pub fn settings_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os("KICADHUB_SETTINGS") {
        return Ok(PathBuf::from(path));
    }
    SettingsStore::default_path().ok_or_else(|| anyhow!("No config directory for this platform"))
}

pub async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let ctx = Arc::new(AppContext::load(&settings_path()?)?);
    let mut host = Host::new(ctx);
    host.start().await?;
    host.run_until(tokio::signal::ctrl_c()).await
}
