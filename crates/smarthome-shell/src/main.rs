//! Smart Home Simulator - interactive command shell

use smarthome_shell::{is_exit, Config, SmartHome};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PROMPT: &[u8] = b"smarthome> ";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_new(&config.logging.filter)
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    tracing::info!("Starting Smart Home Simulator");

    let home = SmartHome::launch(&config)?;
    tracing::info!(
        "{} devices registered, event system {}",
        home.registry().len(),
        if home.event_bus().is_running() {
            "running"
        } else {
            "stopped"
        }
    );

    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(b"Smart Home Simulator. Type 'help' for commands.\n")
        .await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(PROMPT).await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                None
            }
        };
        let Some(line) = line else {
            break;
        };

        if is_exit(&line) {
            break;
        }
        let reply = home.execute(&line).await;
        if !reply.is_empty() {
            stdout.write_all(reply.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
        }
    }

    home.shutdown().await;
    Ok(())
}
