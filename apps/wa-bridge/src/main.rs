mod commands;
mod config;

use std::sync::Arc;

use anyhow::Context;
use qrcode::QrCode;
use qrcode::render::unicode::Dense1x2;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crmlink_wa_connection::{ConnectionEvent, ConnectionManager, GatewayTransport};

use config::BridgeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,crmlink=debug")),
        )
        .init();

    let cfg = BridgeConfig::load().context("failed to load configuration")?;
    info!(
        gateway = %cfg.gateway_url,
        auth_dir = %cfg.auth_dir.display(),
        "starting WhatsApp bridge"
    );

    let transport = Arc::new(GatewayTransport::new(&cfg.gateway_url));
    let manager = ConnectionManager::new(transport, cfg.manager_config());
    let mut events = manager
        .take_events()
        .await
        .context("connection events already taken")?;

    // A failed first open is not fatal: `connect` retries on demand.
    if let Err(e) = manager.initialize().await {
        warn!("initial connection failed: {e}");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupt received, shutting down");
                break;
            }
            event = events.recv() => match event {
                Some(event) => on_event(event, cfg.print_qr),
                None => break,
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => commands::run(&manager, &line).await,
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!("stdin read error: {e}");
                    stdin_open = false;
                }
            },
        }
    }

    manager.shutdown().await;
    Ok(())
}

fn on_event(event: ConnectionEvent, print_qr: bool) {
    match event {
        ConnectionEvent::StateChanged(status) => info!(%status, "WhatsApp connection status"),
        ConnectionEvent::PairingChallenge(code) => {
            info!("pairing challenge ready, scan it from WhatsApp > Linked devices");
            if print_qr {
                match render_qr(&code) {
                    Ok(qr) => println!("{qr}"),
                    Err(e) => warn!("failed to render QR code: {e}"),
                }
            }
        }
        ConnectionEvent::Reconnecting { delay } => {
            info!(delay_secs = delay.as_secs(), "reconnecting to WhatsApp");
        }
        ConnectionEvent::LoggedOut => {
            warn!("device logged out remotely, run `connect` to pair again");
        }
    }
}

/// Renders a pairing challenge as a terminal QR code.
pub(crate) fn render_qr(code: &str) -> anyhow::Result<String> {
    let qr = QrCode::new(code.as_bytes())?;
    Ok(qr
        .render::<Dense1x2>()
        .dark_color(Dense1x2::Light)
        .light_color(Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qr_renders_as_block_characters() {
        let qr = render_qr("2@AbCdEf0123456789,ref,key").unwrap();
        assert!(qr.lines().count() > 10);
        assert!(qr.chars().any(|c| matches!(c, '█' | '▀' | '▄')));
    }
}
