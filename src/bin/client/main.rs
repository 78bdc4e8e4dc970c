//! Command-line client: log in, optionally fetch one user's shares.
//!
//! Usage: `slsk-client [username]`

use std::time::Duration;

use anyhow::{Context, Result};
use slsk_client::constants::UserStatus;
use slsk_client::peer::PeerMessage;
use slsk_client::{Client, ClientConfig, ClientEvent};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG_PATH: &str = "slsk-client.toml";
const BROWSE_TOKEN: i32 = 1;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let username = std::env::var("SOULSEEK_ACCOUNT").context("SOULSEEK_ACCOUNT not set")?;
    let password = std::env::var("SOULSEEK_PASSWORD").context("SOULSEEK_PASSWORD not set")?;
    let browse = std::env::args().nth(1);

    let config = ClientConfig::load_or_default(CONFIG_PATH)?;
    info!(server = %config.server_host, port = config.server_port, "connecting");

    let (client, events) = Client::start(config, &username).await?;
    let logger = tokio::spawn(log_events(events));

    let login = client.login(&password, UserStatus::Online, 0, 0).await?;
    info!(user = client.username(), greeting = %login.greeting, ip = %login.own_ip, "login ok");

    if let Some(target) = browse {
        client
            .connect_to_peer(&target, BROWSE_TOKEN, None)
            .await
            .with_context(|| format!("connecting to {target}"))?;
        client
            .send_to_peer(BROWSE_TOKEN, PeerMessage::SharesRequest)
            .await?;
        // Give the peer time to answer; the listing arrives as an event.
        tokio::time::sleep(Duration::from_secs(30)).await;
    } else {
        tokio::signal::ctrl_c().await?;
    }

    client.shutdown().await;
    logger.abort();
    Ok(())
}

async fn log_events(mut events: mpsc::UnboundedReceiver<ClientEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::Peer {
                token,
                message: PeerMessage::SharesReply { listing },
            } => {
                info!(
                    token,
                    folders = listing.folder_count(),
                    files = listing.file_count(),
                    "received shares"
                );
                for dir in &listing.directories {
                    info!("  {} ({} files)", dir.name, dir.files.len());
                }
            }
            ClientEvent::PeerDecodeFailed { token, error } => {
                warn!(token, %error, "bad peer message");
            }
            ClientEvent::ServerDisconnected => {
                warn!("server disconnected");
            }
            other => info!(?other, "event"),
        }
    }
}
