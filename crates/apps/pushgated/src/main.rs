mod frame;
#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use pushgate_gateway::{spawn_delivery, Gateway, GatewayConfig, GatewayHandle};
use pushgate_ipc::{Backend, MemoryBackend};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};

use frame::{parse_line, FrameWriter, OutboundFrame};

#[derive(Parser, Debug)]
#[command(name = "pushgated", about = "Serves pushgate commands over stdin/stdout")]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides `log_filter` from the config file.
    #[arg(long)]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    let filter = args
        .log
        .clone()
        .unwrap_or_else(|| config.log_filter.clone());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let backend: Arc<dyn Backend> =
        Arc::new(MemoryBackend::new().context("failed to start memory backend")?);
    let (gateway, notifications) = Gateway::new(config, backend);
    let writer = FrameWriter::new(tokio::io::stdout());
    let _delivery = spawn_delivery(notifications, writer.clone());
    let handle = gateway.spawn();

    log::info!("pushgated ready");
    serve(tokio::io::stdin(), &handle, &writer).await?;
    log::info!("stdin closed, shutting down");
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<GatewayConfig> {
    match path {
        Some(path) => GatewayConfig::from_path(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(GatewayConfig::default()),
    }
}

/// Answers one request per input line until EOF.
async fn serve<R, W>(
    input: R,
    gateway: &GatewayHandle,
    writer: &FrameWriter<W>,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send,
{
    let mut lines = BufReader::new(input).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let frame = match parse_line(&line) {
            Ok((id, request)) => {
                let response = gateway.call(request).await?;
                OutboundFrame::Response { id, response }
            }
            Err(rejection) => {
                log::warn!("malformed request line dropped");
                rejection
            }
        };
        writer
            .write(&frame)
            .await
            .context("failed to write response")?;
    }
    Ok(())
}
