//! Murk relay server binary.
//!
//! Configuration comes from the command line and environment:
//!
//! ```text
//! server [BIND_ADDR]
//!
//! MURK_BIND              bind address (default 0.0.0.0:4040)
//! MURK_PASSWORD          relay password (proof required at handshake)
//! MURK_ROOMS             encrypted rooms, "name=passphrase,..." pairs
//! MURK_REDIRECT          relay to redirect unknown downloads to
//! MURK_SERVE_TRANSFERS   "0" to refuse chunk storage (default on)
//! RUST_LOG               tracing filter (default "info")
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;

use anyhow::Context;

use murk_relay::{RelayServer, RelayServerConfig};

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn parse_rooms(raw: &str) -> anyhow::Result<HashMap<String, String>> {
    let mut rooms = HashMap::new();
    for pair in raw.split(',').filter(|pair| !pair.is_empty()) {
        let (name, passphrase) = pair
            .split_once('=')
            .with_context(|| format!("MURK_ROOMS entry {pair:?} is not name=passphrase"))?;
        rooms.insert(name.to_string(), passphrase.to_string());
    }
    Ok(rooms)
}

fn load_config() -> anyhow::Result<RelayServerConfig> {
    let bind: SocketAddr = std::env::args()
        .nth(1)
        .or_else(|| env_opt("MURK_BIND"))
        .unwrap_or_else(|| "0.0.0.0:4040".to_string())
        .parse()
        .context("invalid bind address")?;

    let mut config = RelayServerConfig::new(bind);
    config.password = env_opt("MURK_PASSWORD");
    if let Some(rooms) = env_opt("MURK_ROOMS") {
        config.room_passphrases = parse_rooms(&rooms)?;
    }
    if let Some(redirect) = env_opt("MURK_REDIRECT") {
        config.transfer_redirect = Some(redirect.parse().context("invalid MURK_REDIRECT")?);
    }
    if env_opt("MURK_SERVE_TRANSFERS").as_deref() == Some("0") {
        config.serve_transfers = false;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config()?;
    let (server, mut notices) = RelayServer::spawn(config).await?;
    eprintln!("murk-relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("listening on {}", server.local_addr());

    // Drain notices into the log so the channel never backs up.
    tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            tracing::debug!(?notice, "relay notice");
        }
    });

    server.run_until_ctrl_c().await?;
    Ok(())
}
