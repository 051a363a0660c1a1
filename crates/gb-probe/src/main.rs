use anyhow::Context;
use gb_adapters::{build_adapter, EventSource};
use gb_config::Config;
use gb_core::EventName;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Tracing (JSON logs)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_current_span(false)
        .init();

    let config = Config::load().context("loading connection settings")?;
    let adapter = build_adapter(&config.connection, config.settings.clone());
    let game = adapter.game();
    info!(game = %game, "starting gb-probe");

    let emitter = adapter.emitter();
    for name in EventName::ALL {
        emitter.on(name, move |event| async move {
            match serde_json::to_string(&event) {
                Ok(body) => info!(game = %game, event = %name, body = %body, "event"),
                Err(err) => warn!(game = %game, event = %name, error = %err, "unserializable event"),
            }
        });
    }
    emitter.on_error(move |err| async move {
        error!(game = %game, error = %err, "adapter error");
    });

    let reachability = adapter.test_reachability().await?;
    if reachability.connectable {
        info!(game = %game, latency_ms = reachability.latency, "server reachable");
    } else {
        warn!(
            game = %game,
            reason = reachability.reason.as_deref().unwrap_or_default(),
            "server not reachable"
        );
    }

    adapter.start().await?;
    info!(game = %game, "tailing events, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;

    adapter.stop().await?;
    info!(game = %game, "stopped");
    Ok(())
}
