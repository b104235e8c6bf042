#[macro_use]
extern crate log;

use std::io::Write;
use std::time::Duration;

use ads_input::{AdsInput, Config, ErrorKind, Message};
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Connects, retrying transient failures. Returns `false` if cancelled first.
async fn connect(input: &AdsInput, cancel: &CancellationToken) -> Result<bool> {
    loop {
        match input.connect().await {
            Ok(()) => return Ok(true),
            Err(error) if error.is_retryable() => {
                warn!("connect failed, retrying in {:?}: {}", RETRY_DELAY, error);
            }
            Err(error) => return Err(error.into()),
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(false),
            _ = tokio::time::sleep(RETRY_DELAY) => {}
        }
    }
}

fn print(message: &Message) -> Result<()> {
    let body: serde_json::Value = serde_json::from_slice(&message.body)?;
    let line = serde_json::json!({
        "metadata": message.metadata,
        "body": body,
    });

    let stdout = std::io::stdout();
    let mut stdout = stdout.lock();
    writeln!(stdout, "{}", line)?;
    Ok(())
}

async fn run(input: &AdsInput, cancel: &CancellationToken) -> Result<()> {
    if !connect(input, cancel).await? {
        return Ok(());
    }
    match input.read_state().await {
        Ok(state) => info!(
            "PLC state {} (device state {})",
            state.ads_state, state.device_state
        ),
        Err(error) => warn!("could not read PLC state: {}", error),
    }

    loop {
        let (batch, ack) = match input.read_batch(cancel).await {
            Ok(received) => received,
            Err(error) => match error.kind {
                ErrorKind::Cancelled => return Ok(()),
                ErrorKind::IdleTimeout => continue,
                ErrorKind::TransportClosed | ErrorKind::NotConnected => {
                    warn!("{}, reconnecting", error);
                    if !connect(input, cancel).await? {
                        return Ok(());
                    }
                    continue;
                }
                _ if error.is_retryable() => {
                    warn!("read failed: {}", error);
                    continue;
                }
                _ => return Err(error.into()),
            },
        };

        for message in &batch {
            print(message)?;
        }
        ack.ack(Ok(())).await?;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    let args = std::env::args().collect::<Vec<_>>();
    let path = args.get(1).context("usage: adsinput <config.json>")?;
    let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
    let input = AdsInput::new(Config::from_json(&json)?)?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("interrupted, shutting down");
                    cancel.cancel();
                }
                Err(error) => error!("cannot listen for ctrl-c: {}", error),
            }
        }
    });

    let result = run(&input, &cancel).await;
    input.close().await?;
    result
}
