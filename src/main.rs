use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use bleproof::config::{AppConfig, CONFIG_FILE_NAME};
use bleproof::core::bluetooth::{CentralState, CentralUpdate, display_value};
use bleproof::logging::{self, LogSink};
use bleproof::state::AppState;
use log::{LevelFilter, info};
use tokio::sync::broadcast;
use tokio::time::timeout;

const STEP_TIMEOUT: Duration = Duration::from_secs(15);

/// Waits for the first update that `pick` accepts
async fn wait_for<T>(
    updates: &mut broadcast::Receiver<CentralUpdate>,
    what: &str,
    mut pick: impl FnMut(&CentralUpdate) -> Option<T>,
) -> Result<T> {
    let found = timeout(STEP_TIMEOUT, async {
        loop {
            match updates.recv().await {
                Ok(update) => {
                    if let Some(value) = pick(&update) {
                        return Ok(value);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(anyhow!("central session stopped"));
                }
            }
        }
    })
    .await
    .with_context(|| format!("timed out waiting for {}", what))??;
    Ok(found)
}

fn print_log(title: &str, log: &LogSink) {
    println!("--- {} ---", title);
    for entry in log.entries() {
        println!("{}", entry.line());
    }
}

/// Runs both roles against each other over the simulated air: connect,
/// read, write, then push an indication from the peripheral.
#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = logging::init(LevelFilter::Info) {
        eprintln!("Failed to initialize logger: {}", e);
    }

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    let config = AppConfig::load_config(&config_path).await?;

    let (state, _air) = AppState::simulated(config);
    let mut updates = state.central.subscribe();

    state.peripheral.set_advertising(true).await?;
    state.central.set_enabled(true).await?;

    wait_for(&mut updates, "connection", |update| match update {
        CentralUpdate::StateChanged {
            to: CentralState::Connected,
            ..
        } => Some(()),
        _ => None,
    })
    .await?;
    info!("Central connected and subscribed");

    state.central.read().await?;
    let value = wait_for(&mut updates, "read", |update| match update {
        CentralUpdate::ReadValue(value) => Some(value.clone()),
        _ => None,
    })
    .await?;
    info!("Read {}", display_value(&value));

    state.central.write_text("hello from central").await?;

    let sent = state.peripheral.send_text("hello from peripheral").await?;
    info!("Indication sent to {} subscriber(s)", sent);
    let value = wait_for(&mut updates, "indication", |update| match update {
        CentralUpdate::IndicateValue(value) => Some(value.clone()),
        _ => None,
    })
    .await?;
    info!("Indicated {}", display_value(&value));

    state.central.set_enabled(false).await?;
    state.peripheral.set_advertising(false).await?;

    print_log("central", &state.central_log);
    print_log("peripheral", &state.peripheral_log);

    state.shutdown().await;
    Ok(())
}
