use anyhow::Result;
use log::{error, info, warn};
use rocket::data::{Limits, ToByteUnit};
use std::sync::Arc;
use std::time::Duration;

use snapcube::api::{AppState, build_rocket};
use snapcube::background::registry::JobRegistry;
use snapcube::common::ROCKET_RUNTIME;
use snapcube::config::{AppConfig, init_config};
use snapcube::process::initialize;
use snapcube::storage;

const JOB_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
const JOB_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

fn rocket_figment(config: &AppConfig) -> Result<rocket::figment::Figment> {
    let (address, port) = config.address_and_port()?;
    let limits = Limits::default()
        .limit("file", 4.gibibytes())
        .limit("data-form", 4.gibibytes())
        .limit("form", 64.kibibytes())
        .limit("json", 1.mebibytes());
    Ok(rocket::Config::figment()
        .merge(("address", address))
        .merge(("port", port))
        .merge(("temp_dir", config.temp_path.clone()))
        .merge(("limits", limits)))
}

fn build_state(config: &AppConfig) -> AppState {
    let storage = match storage::from_config(config) {
        Ok(storage) => Some(storage),
        Err(e) => {
            warn!("Remote storage disabled: {:#}", e);
            None
        }
    };
    AppState {
        config: Arc::new(config.clone()),
        storage,
        registry: Arc::new(JobRegistry::new()),
    }
}

fn main() -> Result<()> {
    let config = init_config()?;
    initialize(config)?;

    let result = ROCKET_RUNTIME.block_on(async {
        let state = build_state(config);

        let registry = state.registry.clone();
        ROCKET_RUNTIME.spawn(async move {
            let mut interval = tokio::time::interval(JOB_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let evicted = registry.evict_finished(JOB_RETENTION);
                if evicted > 0 {
                    info!("Evicted {} finished tasks", evicted);
                }
            }
        });

        let rocket = rocket::custom(rocket_figment(config)?);
        let rocket_instance = build_rocket(rocket, state).ignite().await?;
        info!("Listening on {}", config.listen);
        rocket_instance.launch().await?;
        Ok::<(), anyhow::Error>(())
    });

    if let Err(e) = &result {
        error!("Rocket server failed: {:#}", e);
    }
    result
}
