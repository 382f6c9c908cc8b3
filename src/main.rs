//! proxy-echo: accept PROXY protocol connections, greet each client with
//! its decoded address, then echo everything it sends.

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use proxy_stream::{ProxyListener, ProxyStream, ServerConfig};

type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Debug, Parser)]
#[command(name = "proxy-echo")]
#[command(version, about, long_about = None)]
struct Cli {
    /// the address to listen on (overrides the config file)
    #[arg(long, short = 'l')]
    listen: Option<String>,

    /// TOML config file; `PROXY_STREAM_*` env vars override its values
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> Result<ServerConfig, BoxError> {
    let mut config = match &cli.config {
        Some(path) => {
            let path = path.to_str().ok_or("config path is not valid UTF-8")?;
            ServerConfig::from_path(path)?
        }
        None => ServerConfig::from_env()?,
    };
    if let Some(listen) = &cli.listen {
        config.listen = listen.clone();
    }
    Ok(config)
}

async fn handle(mut stream: ProxyStream<TcpStream>) -> Result<(), BoxError> {
    stream.read_header().await?;
    let remote = stream.remote_addr()?;
    info!(%remote, network = remote.network(), "client connected");

    stream
        .write_all(format!("{}\n\n", remote).as_bytes())
        .await?;

    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        stream.write_all(&buf[..n]).await?;
    }
    stream.shutdown().await?;
    debug!(%remote, "client disconnected");
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    #[allow(clippy::exit)]
    if let Err(err) = run(cli).await {
        error!("exit with error: {}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), BoxError> {
    let config = load_config(&cli)?;
    let listener = ProxyListener::bind(config.listen.as_str(), config.proxy_protocol.clone()).await?;
    info!(
        addr = %listener.local_addr()?,
        proxy_protocol = config.proxy_protocol.enabled,
        "proxy-echo listening"
    );

    loop {
        let (stream, peer) = listener.accept().await?;
        tokio::spawn(async move {
            if let Err(e) = handle(stream).await {
                warn!(%peer, error = %e, "connection closed with error");
            }
        });
    }
}
