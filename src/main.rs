use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sqlmcp::config::Config;
use sqlmcp::tools::ToolHandler;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load();

    // stdout carries responses, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_writer(std::io::stderr)
        .init();

    info!("sqlmcp v{}", env!("CARGO_PKG_VERSION"));
    info!("Using endpoint: {}", config.connection);

    let startup_config = config.clone();
    let handler = match tokio::task::spawn_blocking(move || ToolHandler::connect(&startup_config)).await? {
        Ok(handler) => Arc::new(handler),
        Err(e) => {
            error!("Failed to connect: {}", e);
            return Err(e.into());
        }
    };

    // Single writer keeps response lines whole
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            if let Err(e) = write_line(&mut stdout, &line).await {
                error!("Failed to write response: {}", e);
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => {
                        let handler = handler.clone();
                        let tx = tx.clone();
                        in_flight.spawn_blocking(move || {
                            let response = handler.handle_request_line(&line);
                            let _ = tx.send(response);
                        });
                    }
                    Ok(None) => {
                        info!("Input closed");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read request: {}", e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    error!("Request task failed: {}", e);
                }
            }
        }
    }

    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!("Request task failed: {}", e);
        }
    }
    drop(tx);
    writer.await?;

    let shutdown_handler = handler.clone();
    tokio::task::spawn_blocking(move || shutdown_handler.shutdown()).await?;
    info!("sqlmcp stopped");
    Ok(())
}

async fn write_line(stdout: &mut tokio::io::Stdout, line: &str) -> std::io::Result<()> {
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
