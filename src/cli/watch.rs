//! The watch command: mount one server and log its live state until Ctrl-C.

use std::sync::Arc;

use color_eyre::eyre::eyre;
use color_eyre::Result;
use tracing::{error, info, warn};

use super::args::WatchArgs;
use crate::adapters::{ReqwestHttpClient, TungsteniteConnector};
use crate::api::{PanelApiClient, PanelTokenProvider};
use crate::config::SyncConfig;
use crate::connection::ConnectionState;
use crate::error::SyncResult;
use crate::models::StatsPayload;
use crate::power::PowerOutcome;
use crate::view::{ServerView, ServerViewRegistry};
use crate::websocket::events;

/// Environment configuration with the command-line overrides applied.
pub fn build_config(args: &WatchArgs) -> SyncResult<SyncConfig> {
    let mut config = SyncConfig::from_env()?;
    if let Some(ref url) = args.api_url {
        config = config.with_api_url(url.clone());
    }
    if let Some(ref key) = args.api_key {
        config = config.with_api_key(key.clone());
    }
    config.validate()?;
    Ok(config)
}

/// Scheme and authority of `url`, sent as the websocket `Origin`.
pub fn origin_of(url: &str) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    let host = rest.split('/').next().filter(|h| !h.is_empty())?;
    Some(format!("{}://{}", scheme, host))
}

pub async fn run_watch(args: WatchArgs) -> Result<()> {
    let config = build_config(&args)?;

    let mut api = PanelApiClient::new(ReqwestHttpClient::try_with_timeout(config.http_timeout)?, &config.api_url);
    if let Some(ref key) = config.api_key {
        api = api.with_api_key(key);
    }
    let api = Arc::new(api);
    let mut connector = TungsteniteConnector::new();
    if let Some(origin) = origin_of(&config.api_url) {
        connector = connector.with_origin(origin);
    }
    let registry = ServerViewRegistry::new(
        Arc::clone(&api),
        Arc::new(connector),
        Arc::new(PanelTokenProvider::new(api)),
        config,
    );

    let view = registry.mount(args.server.clone()).await?;
    log_events(&view);
    let snapshot = view.snapshot();
    info!(
        server = %view.identity(),
        name = snapshot.name.as_deref().unwrap_or("-"),
        status = %snapshot.status,
        active = snapshot.status.is_active(),
        address = %snapshot.default_allocation().map(|a| a.display_address()).unwrap_or_default(),
        "watching server"
    );

    let mut connection = view.subscribe_connection();
    let mut outcomes = view.power_controller().subscribe_outcomes();
    let mut power = args.power;

    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break Ok(());
            }
            changed = connection.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let state = *connection.borrow_and_update();
                info!(%state, "connection");
                match state {
                    ConnectionState::Connected => {
                        if let Some(signal) = power.take() {
                            match view.power(signal).await {
                                Ok(accepted) => info!(%signal, status = ?accepted.status, "power signal accepted"),
                                Err(err) => error!(%signal, code = err.error_code(), "{}", err.user_message()),
                            }
                        }
                    }
                    ConnectionState::Errored => break Err(eyre!("connection to {} failed", view.identity())),
                    _ => {}
                }
            }
            outcome = outcomes.recv() => match outcome {
                Ok(PowerOutcome::Confirmed { signal, status }) => info!(%signal, %status, "power command confirmed"),
                Ok(outcome @ PowerOutcome::Unconfirmed { .. }) => {
                    if let Some(err) = outcome.error() {
                        warn!(code = err.error_code(), "{}", err.user_message());
                    }
                }
                Err(_) => {}
            },
        }
    };

    view.unmount();
    result
}

fn log_events(view: &ServerView<ReqwestHttpClient>) {
    view.subscribe(events::CONSOLE_OUTPUT, |event| {
        for line in &event.args {
            info!(target: "console", "{}", line);
        }
    });
    view.subscribe(events::INSTALL_OUTPUT, |event| {
        for line in &event.args {
            info!(target: "install", "{}", line);
        }
    });
    view.subscribe(events::DAEMON_MESSAGE, |event| {
        info!(message = event.first_arg().unwrap_or_default(), "daemon message");
    });
    view.subscribe(events::DAEMON_ERROR, |event| {
        warn!(message = event.first_arg().unwrap_or_default(), "daemon error");
    });
    view.subscribe(events::STATUS, |event| {
        info!(status = event.first_arg().unwrap_or_default(), "status");
    });
    view.subscribe(events::STATS, |event| {
        let Some(raw) = event.first_arg() else { return };
        if let Ok(stats) = serde_json::from_str::<StatsPayload>(raw) {
            let sample = stats.into_sample(chrono::Utc::now());
            tracing::debug!(
                cpu = sample.cpu_absolute,
                memory_mib = sample.memory_mib(),
                uptime = %sample.uptime_display(),
                "stats"
            );
        }
    });
}
