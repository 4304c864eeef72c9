//! Skyhopper
//!
//! Opens a Carrera Control Unit on a serial port and relays its status
//! snapshots and timer events to stdout as JSON lines.
//!
//! Logging goes to stderr and honours `RUST_LOG` (default `info`).
//! Ctrl-C stops the relay after the request in flight.

use anyhow::{Context, Result};
use carrera_core::event::{JsonLinesPublisher, Relay, RelayError};
use carrera_core::protocol::{
    list_ports, ConnectionConfig, ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS,
};
use carrera_core::ControlUnit;
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Port used when none is given and none is detected
const FALLBACK_PORT: &str = "/dev/ttyUSB0";

/// Delay before reopening the port after the connection drops
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(
    name = "skyhopper",
    version,
    about = "Relay Carrera Control Unit events as JSON lines"
)]
struct Cli {
    /// Serial port of the CU adapter [default: first detected USB serial port]
    #[arg(short, long, value_name = "PORT")]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Read/write timeout in milliseconds
    #[arg(short, long, default_value_t = DEFAULT_TIMEOUT_MS, value_name = "MS")]
    timeout: u64,
}

impl Cli {
    fn connection_config(self, detected: impl FnOnce() -> Option<String>) -> ConnectionConfig {
        let port = self
            .port
            .or_else(detected)
            .unwrap_or_else(|| FALLBACK_PORT.to_string());
        let mut config = ConnectionConfig::new(port);
        config.baud_rate = self.baud;
        config.timeout_ms = self.timeout;
        config
    }
}

fn first_detected_port() -> Option<String> {
    let port = list_ports().into_iter().next()?;
    tracing::info!(
        "detected {} ({})",
        port.name,
        port.product.as_deref().unwrap_or("unknown adapter")
    );
    Some(port.name)
}

/// Sleep for `delay`, waking early once `stop` is set
fn pause(delay: Duration, stop: &AtomicBool) {
    let until = Instant::now() + delay;
    while !stop.load(Ordering::Relaxed) && Instant::now() < until {
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Cli::parse().connection_config(first_detected_port);

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))
            .context("failed to install Ctrl-C handler")?;
    }

    while !stop.load(Ordering::Relaxed) {
        let mut cu = match ControlUnit::open(config.clone()) {
            Ok(cu) => cu,
            Err(e) => {
                tracing::error!("cannot open {}: {}", config.port_name, e);
                pause(RECONNECT_DELAY, &stop);
                continue;
            }
        };

        match cu.version() {
            Ok(version) => tracing::info!("CU version {}", version),
            Err(e) => {
                tracing::warn!("version query failed: {}", e);
                cu.close();
                pause(RECONNECT_DELAY, &stop);
                continue;
            }
        }

        let publisher = JsonLinesPublisher::new(std::io::stdout().lock());
        let mut relay = Relay::new(cu, publisher);
        match relay.run(&stop) {
            Ok(()) => {}
            Err(RelayError::Protocol(ProtocolError::NotConnected)) => {
                tracing::warn!("connection lost, reopening");
            }
            Err(e) => tracing::error!("relay stopped: {}", e),
        }
        relay.control_unit().close();
        pause(RECONNECT_DELAY, &stop);
    }

    tracing::info!("interrupted, shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["skyhopper"]).unwrap();
        assert_eq!(cli.port, None);
        assert_eq!(cli.baud, DEFAULT_BAUD_RATE);
        assert_eq!(cli.timeout, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn test_explicit_port_wins_over_detection() {
        let cli = Cli::try_parse_from(["skyhopper", "-p", "/dev/ttyACM3", "--baud", "9600"])
            .unwrap();
        let config = cli.connection_config(|| panic!("detection should not run"));
        assert_eq!(config.port_name, "/dev/ttyACM3");
        assert_eq!(config.baud_rate, 9600);
    }

    #[test]
    fn test_detected_port_then_fallback() {
        let cli = Cli::try_parse_from(["skyhopper", "--timeout", "250"]).unwrap();
        let config = cli.connection_config(|| Some("/dev/ttyUSB2".to_string()));
        assert_eq!(config.port_name, "/dev/ttyUSB2");
        assert_eq!(config.timeout_ms, 250);

        let cli = Cli::try_parse_from(["skyhopper"]).unwrap();
        assert_eq!(cli.connection_config(|| None).port_name, FALLBACK_PORT);
    }

    #[test]
    fn test_rejects_bad_numbers() {
        assert!(Cli::try_parse_from(["skyhopper", "--baud", "fast"]).is_err());
    }

    #[test]
    fn test_pause_returns_early_when_stopped() {
        let stop = AtomicBool::new(true);
        let start = Instant::now();
        pause(Duration::from_secs(5), &stop);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
