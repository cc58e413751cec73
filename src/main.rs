//! GOEWS model server
//!
//! Serves parametric part models generated on demand by OpenSCAD, with
//! memoized, coalesced builds under a global process budget.

use anyhow::{Context, Result};
use tracing::info;

use goews_forge::config::ForgeConfig;
use goews_forge::server::{run_server, AppState};
use goews_forge::utils::telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    init_tracing().context("failed to initialize logging")?;

    let config = ForgeConfig::from_env()?;
    info!(
        generator = %config.openscad_bin.display(),
        model = %config.model_file.display(),
        max_concurrent_builds = config.max_concurrent_builds,
        cache_capacity = config.cache_capacity,
        "Starting model server"
    );

    let state = AppState::new(config.build_pipeline()).with_diagnostics(config.expose_diagnostics);
    run_server(state, &config.bind_addr).await
}
