//! TradeX event stream
//!
//! Connects with the credentials from `.env`, logs every order and trade
//! event and runs until Ctrl+C.
//!
//! Configuration path: the first command line argument if given, otherwise
//! `TRADEX_CONFIG_PATH` (default `config/tradex.yaml`).

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, warn};
use tradex_client::bin_common::{
    init_logging_with_level, load_config_from_env, parse_args, print_banner, print_shutdown,
    AppConfig, ConfigType, ShutdownManager,
};
use tradex_client::tradex_ws::{ClientEvent, Event, TradexWsClient, ORDER_EVENT, TRADE_EVENT};

const NAME: &str = "TradeX Stream";

#[tokio::main]
async fn main() -> Result<()> {
    let config_type = match parse_args().into_iter().next() {
        Some(path) => ConfigType::Custom(path),
        None => ConfigType::Client,
    };
    let config_path = load_config_from_env(config_type);
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    init_logging_with_level(&config.log_level);
    config.log();

    let shutdown = ShutdownManager::new();
    shutdown.spawn_signal_handler();

    let endpoint = config.client.display_url();
    let client = TradexWsClient::new(config.client);

    client.register_callback(ORDER_EVENT, |event: Event| {
        if let Event::Order(order) = event {
            info!("[ORDER] {}", order.data);
        }
        Ok(())
    });
    client.register_callback(TRADE_EVENT, |event: Event| {
        if let Event::Trade(trade) = event {
            info!("[TRADE] {}", trade.data);
        }
        Ok(())
    });

    print_banner(NAME, &endpoint);

    if !client.start().await {
        anyhow::bail!("Could not connect to {}", endpoint);
    }

    while shutdown.is_running() {
        while let Some(event) = client.try_recv_event() {
            match event {
                ClientEvent::Connected => info!("Stream connected"),
                ClientEvent::Disconnected => warn!("Stream disconnected"),
                ClientEvent::Reconnecting(attempt) => info!("Reconnect attempt {}", attempt),
                ClientEvent::Error(e) => warn!("Connection error: {}", e),
            }
        }

        if !client.is_running() {
            warn!("Client gave up reconnecting");
            break;
        }

        shutdown.interruptible_sleep(Duration::from_millis(500)).await;
    }

    client.stop().await;

    let metrics = client.metrics();
    let stats = format!(
        "Messages: {} received, {} dispatched | Frames sent: {} | Reconnects: {}",
        metrics.messages_received,
        metrics.messages_dispatched,
        metrics.frames_sent,
        metrics.reconnect_count
    );
    print_shutdown(NAME, Some(&stats));

    Ok(())
}
