use clap::Parser;
use url::Url;

mod connection;
mod local;
mod upstream;
mod web;

pub use connection::*;
pub use local::*;
pub use upstream::*;
pub use web::*;

use std::{net, path::PathBuf};

#[derive(Parser, Clone)]
pub struct Cli {
    /// Listen on this address
    #[arg(long, default_value = "[::]:443")]
    pub bind: net::SocketAddr,

    /// The TLS configuration.
    #[command(flatten)]
    pub tls: quicr_native::tls::Args,

    /// Directory to write qlog files (one per connection)
    #[arg(long)]
    pub qlog_dir: Option<PathBuf>,

    /// Enable development mode.
    /// This hosts a HTTPS web server via TCP to serve the fingerprint of the certificate.
    #[arg(long)]
    pub dev: bool,

    /// Serve qlog files over HTTPS at /qlog/:cid
    /// Requires --dev to enable the web server. Only serves files by exact CID - no index.
    #[arg(long)]
    pub qlog_serve: bool,

    /// Parent relay to dial for cache-fill on a subscription miss, and to
    /// mirror local publishes into (`spec.md` §4.8). Omit to run as an
    /// origin relay with no upstream.
    #[arg(long)]
    pub parent: Option<Url>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    // Disable tracing so we don't get a bunch of Quinn spam.
    let tracer = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::WARN)
        .finish();
    tracing::subscriber::set_global_default(tracer).unwrap();

    let cli = Cli::parse();

    let qlog_dir_for_web = if cli.qlog_serve { cli.qlog_dir.clone() } else { None };

    let quic_config = quicr_native::quic::Args {
        bind: cli.bind,
        qlog_dir: cli.qlog_dir,
        tls: cli.tls,
    }
    .load()?;

    if quic_config.tls.server.is_none() {
        anyhow::bail!("missing TLS certificates");
    }
    let tls = quic_config.tls.clone_for_web();

    let mut endpoint = quicr_native::quic::Endpoint::new(quic_config)?;
    let mut server = endpoint.server.take().context_missing_server()?;

    if cli.dev {
        let web = Web::new(WebConfig {
            bind: cli.bind,
            tls,
            qlog_dir: qlog_dir_for_web,
        });

        tokio::spawn(async move {
            if let Err(err) = web.run().await {
                log::error!("web server error: {err}");
            }
        });
    }

    log::info!("listening on {}", server.local_addr()?);

    let registry = Locals::new();
    let upstream = match cli.parent {
        Some(parent) => {
            log::info!("cache-filling and mirroring publishes from parent relay: {parent}");
            Upstream::new(endpoint.client.clone(), Some(parent))
        }
        None => Upstream::none(),
    };

    loop {
        let Some((session, cid)) = server.accept().await else {
            return Ok(());
        };
        log::debug!("accepted connection: {cid}");
        let connection = Connection::new(session, registry.clone(), upstream.clone());
        tokio::spawn(async move {
            if let Err(err) = connection.run().await {
                log::warn!("connection {cid} closed with error: {err}");
            }
        });
    }
}

trait OptionExt<T> {
    fn context_missing_server(self) -> anyhow::Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn context_missing_server(self) -> anyhow::Result<T> {
        self.ok_or_else(|| anyhow::anyhow!("endpoint has no server configured"))
    }
}
