//! Binary runner utilities
//!
//! Logging setup and graceful shutdown for long-running binaries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::time::sleep;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Initialize tracing for binaries with a specific log level
///
/// `RUST_LOG` takes precedence when set.
pub fn init_logging_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .init();
}

/// Print startup banner
pub fn print_banner(name: &str, endpoint: &str) {
    info!("");
    info!("========================================");
    info!("Starting {}", name);
    info!("Endpoint: {}", endpoint);
    info!("Press Ctrl+C to stop");
    info!("========================================");
    info!("");
}

/// Print shutdown banner
pub fn print_shutdown(name: &str, stats: Option<&str>) {
    info!("");
    info!("========================================");
    info!("{} stopped gracefully", name);
    if let Some(stats) = stats {
        info!("{}", stats);
    }
    info!("========================================");
}

/// Manages graceful shutdown for long-running processes
pub struct ShutdownManager {
    flag: Arc<AtomicBool>,
}

impl ShutdownManager {
    /// Create a new shutdown manager with running state
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Spawn a Ctrl+C signal handler that triggers shutdown
    pub fn spawn_signal_handler(&self) {
        let flag = Arc::clone(&self.flag);
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                info!("");
                info!("Received shutdown signal (Ctrl+C)");
                info!("Shutting down gracefully...");
                flag.store(false, Ordering::Release);
            }
        });
    }

    pub fn is_running(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Trigger shutdown without a signal
    pub fn request_shutdown(&self) {
        self.flag.store(false, Ordering::Release);
    }

    /// Sleep for a duration, but wake early if shutdown is triggered
    pub async fn interruptible_sleep(&self, duration: Duration) {
        let check_interval = Duration::from_millis(50);
        let mut elapsed = Duration::ZERO;

        while elapsed < duration && self.is_running() {
            sleep(check_interval.min(duration - elapsed)).await;
            elapsed += check_interval;
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
