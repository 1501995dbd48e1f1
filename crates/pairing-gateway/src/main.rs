//! Pairing gateway: entry point.
//!
//! Serves `GET /api/auth?phone=<number>`: pairs a protocol client with the
//! phone, waits until the connection opens and answers with the session's
//! credential files packed as `sessions.zip`.
//!
//! # Usage
//!
//! ```text
//! pairing-gateway [OPTIONS]
//!
//! Options:
//!   --bind               <IP>    HTTP bind address [default: 0.0.0.0]
//!   --port               <PORT>  HTTP port [default: 3000]
//!   --session-path       <DIR>   Parent of the per-phone session dirs
//!   --auth-timeout-ms    <MS>    Handshake deadline [default: 90000]
//!   --teardown-delay-ms  <MS>    Delay before logout/end [default: 1000]
//!   --protocol-endpoint  <URL>   Protocol daemon WebSocket URL
//!   --browser            <A,B,C> Client identity [default: Ubuntu,Chrome,20.0.04]
//! ```
//!
//! # Environment variable overrides
//!
//! CLI args take precedence when both are present.
//!
//! | Variable            | Default                  |
//! |---------------------|--------------------------|
//! | `PAIRING_BIND`      | `0.0.0.0`                |
//! | `PORT`              | `3000`                   |
//! | `SESSION_PATH`      | `<temp dir>/sessions`    |
//! | `AUTH_TIMEOUT_MS`   | `90000`                  |
//! | `TEARDOWN_DELAY_MS` | `1000`                   |
//! | `PROTOCOL_ENDPOINT` | `ws://127.0.0.1:8787`    |
//! | `PAIRING_BROWSER`   | `Ubuntu,Chrome,20.0.04`  |
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pairing_core::ClientIdentity;
use pairing_gateway::domain::ServerConfig;
use pairing_gateway::infrastructure::auth_store::MultiFileAuthStore;
use pairing_gateway::infrastructure::http_server::run_server;
use pairing_gateway::infrastructure::sidecar_client::SidecarClientFactory;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// HTTP gateway that pairs a messaging-protocol client and returns its
/// credential files.
#[derive(Debug, Parser)]
#[command(
    name = "pairing-gateway",
    about = "Pairs a messaging-protocol client and exports its session as a zip",
    version
)]
struct Cli {
    /// IP address to bind the HTTP server to.
    #[arg(long, default_value = "0.0.0.0", env = "PAIRING_BIND")]
    bind: String,

    /// TCP port of the HTTP server.
    #[arg(long, default_value_t = 3000, env = "PORT")]
    port: u16,

    /// Parent directory of the per-phone session directories.
    ///
    /// Defaults to `sessions` under the system temporary directory.
    #[arg(long, env = "SESSION_PATH")]
    session_path: Option<PathBuf>,

    /// Milliseconds to wait for the connection to open.
    #[arg(
        long,
        default_value_t = 90_000,
        env = "AUTH_TIMEOUT_MS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    auth_timeout_ms: u64,

    /// Milliseconds between the handshake outcome and client logout/end.
    #[arg(long, default_value_t = 1_000, env = "TEARDOWN_DELAY_MS")]
    teardown_delay_ms: u64,

    /// WebSocket URL of the protocol daemon.
    #[arg(long, default_value = "ws://127.0.0.1:8787", env = "PROTOCOL_ENDPOINT")]
    protocol_endpoint: String,

    /// Client identity as `platform,browser,version`.
    #[arg(long, default_value = "Ubuntu,Chrome,20.0.04", env = "PAIRING_BROWSER")]
    browser: String,
}

impl Cli {
    /// Converts the parsed CLI arguments into a [`ServerConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if `--bind` is not a valid IP address or `--browser`
    /// is not three comma-separated, non-empty parts.
    fn into_server_config(self) -> anyhow::Result<ServerConfig> {
        let bind_addr: SocketAddr = format!("{}:{}", self.bind, self.port)
            .parse()
            .with_context(|| format!("invalid bind address: '{}:{}'", self.bind, self.port))?;

        let client_identity: ClientIdentity = self
            .browser
            .parse()
            .with_context(|| format!("invalid client identity: '{}'", self.browser))?;

        let session_path = self
            .session_path
            .unwrap_or_else(|| std::env::temp_dir().join("sessions"));

        Ok(ServerConfig {
            bind_addr,
            session_path,
            auth_timeout: Duration::from_millis(self.auth_timeout_ms),
            teardown_delay: Duration::from_millis(self.teardown_delay_ms),
            client_identity,
            protocol_endpoint: self.protocol_endpoint,
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_server_config()?;

    info!(
        "pairing gateway starting: http={}, daemon={}, timeout={} ms",
        config.bind_addr,
        config.protocol_endpoint,
        config.auth_timeout.as_millis()
    );

    let factory = Arc::new(SidecarClientFactory::new(config.protocol_endpoint.clone()));
    let store = Arc::new(MultiFileAuthStore::new());

    run_server(config, factory, store, shutdown_signal()).await
}

/// Completes on Ctrl+C.  Never completes if the signal cannot be observed.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl+C; initiating graceful shutdown"),
        Err(e) => {
            error!("failed to listen for Ctrl+C signal: {e}");
            std::future::pending::<()>().await;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["pairing-gateway"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn test_cli_port_override() {
        // Arrange: override --port
        let cli = cli(&["--port", "8080"]);

        // Assert
        assert_eq!(cli.port, 8080);
    }

    #[test]
    fn test_cli_auth_timeout_override() {
        let cli = cli(&["--auth-timeout-ms", "50"]);
        assert_eq!(cli.auth_timeout_ms, 50);
    }

    #[test]
    fn test_cli_rejects_zero_auth_timeout() {
        let result = Cli::try_parse_from(["pairing-gateway", "--auth-timeout-ms", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_into_server_config_custom_values() {
        // Arrange
        let cli = cli(&[
            "--bind",
            "127.0.0.1",
            "--port",
            "9000",
            "--session-path",
            "/var/lib/pairing",
            "--auth-timeout-ms",
            "1500",
            "--teardown-delay-ms",
            "20",
            "--protocol-endpoint",
            "ws://daemon:9999",
            "--browser",
            "Mac OS,Safari,17.0",
        ]);

        // Act
        let config = cli.into_server_config().unwrap();

        // Assert
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.session_path, PathBuf::from("/var/lib/pairing"));
        assert_eq!(config.auth_timeout, Duration::from_millis(1500));
        assert_eq!(config.teardown_delay, Duration::from_millis(20));
        assert_eq!(config.protocol_endpoint, "ws://daemon:9999");
        assert_eq!(config.client_identity.platform, "Mac OS");
        assert_eq!(config.client_identity.version, "17.0");
    }

    #[test]
    fn test_into_server_config_invalid_bind_returns_error() {
        // Arrange: an invalid IP address string
        let cli = Cli {
            bind: "not.an.ip".to_string(),
            port: 3000,
            session_path: None,
            auth_timeout_ms: 90_000,
            teardown_delay_ms: 1_000,
            protocol_endpoint: "ws://127.0.0.1:8787".to_string(),
            browser: "Ubuntu,Chrome,20.0.04".to_string(),
        };

        // Act
        let result = cli.into_server_config();

        // Assert: must return an error, not panic
        assert!(result.is_err());
    }

    #[test]
    fn test_into_server_config_invalid_browser_returns_error() {
        let cli = Cli {
            bind: "0.0.0.0".to_string(),
            port: 3000,
            session_path: None,
            auth_timeout_ms: 90_000,
            teardown_delay_ms: 1_000,
            protocol_endpoint: "ws://127.0.0.1:8787".to_string(),
            browser: "Ubuntu,Chrome".to_string(),
        };

        assert!(cli.into_server_config().is_err());
    }

    #[test]
    fn test_missing_session_path_defaults_to_temp_dir() {
        let cli = Cli {
            bind: "0.0.0.0".to_string(),
            port: 3000,
            session_path: None,
            auth_timeout_ms: 90_000,
            teardown_delay_ms: 1_000,
            protocol_endpoint: "ws://127.0.0.1:8787".to_string(),
            browser: "Ubuntu,Chrome,20.0.04".to_string(),
        };

        let config = cli.into_server_config().unwrap();

        assert_eq!(config.session_path, std::env::temp_dir().join("sessions"));
    }
}
