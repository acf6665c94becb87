use anyhow::Context;
use bytes::BytesMut;
use clap::Parser;
use url::Url;

mod clock;

use quicr_core::message::{CachePolicy, Message, TransportMode};

#[derive(Parser, Clone)]
pub struct Cli {
    /// Listen for UDP packets on the given address.
    #[arg(long, default_value = "[::]:0")]
    pub bind: std::net::SocketAddr,

    /// Connect to the given URL, e.g. `quicr://localhost:4443/clock`.
    #[arg()]
    pub url: Url,

    /// The TLS configuration.
    #[command(flatten)]
    pub tls: quicr_native::tls::Args,

    /// Publish the current time to the relay, otherwise only subscribe.
    #[arg(long)]
    pub publish: bool,
}

/// The main entry point for the clock demo.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    // Disable tracing so we don't get a bunch of Quinn spam.
    let tracer = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::WARN)
        .finish();
    tracing::subscriber::set_global_default(tracer).unwrap();

    let config = Cli::parse();

    let quic_config = quicr_native::quic::Args {
        bind: config.bind,
        qlog_dir: None,
        tls: config.tls,
    }
    .load()?;

    let endpoint = quicr_native::quic::Endpoint::new(quic_config)?;

    log::info!("connecting to server: url={}", config.url);

    let (session, connection_id) = endpoint.client.connect(&config.url).await?;

    log::info!(
        "connected with CID: {} (use this to look up qlog/mlog on server)",
        connection_id
    );

    let (mut send, mut recv) = session.open_bi().await.context("failed to open control stream")?;

    if config.publish {
        let msg = Message::Post {
            url: config.url.to_string(),
            transport: TransportMode::SingleStream,
            cache_policy: CachePolicy::default(),
            start_group: 0,
            start_object: 0,
        };
        let mut framed = BytesMut::new();
        msg.encode_framed(&mut framed)?;
        send.write(&framed).await.context("failed to send Post")?;

        let mut inbound = BytesMut::new();
        let accept = read_message(&mut recv, &mut inbound).await?.context("connection closed before Accept")?;
        let Message::Accept { .. } = accept else {
            anyhow::bail!("expected Accept, got {accept:?}");
        };

        clock::Publisher::new(send).run().await.context("clock error")?;
    } else {
        let msg = Message::RequestStream { url: config.url.to_string() };
        let mut framed = BytesMut::new();
        msg.encode_framed(&mut framed)?;
        send.write(&framed).await.context("failed to send RequestStream")?;

        let mut inbound = BytesMut::new();
        let accept = read_message(&mut recv, &mut inbound).await?.context("connection closed before Accept")?;
        let Message::Accept { .. } = accept else {
            anyhow::bail!("expected Accept, got {accept:?}");
        };

        clock::Subscriber::new(recv, inbound).run().await.context("clock error")?;
    }

    Ok(())
}

/// Reads frames off `recv` into `buf` until one `Message` decodes; used for
/// the `Accept` reply expected right after `Post`/`RequestStream`. Any bytes
/// already buffered past that frame are left in `buf` for the caller.
async fn read_message(recv: &mut web_transport::RecvStream, buf: &mut BytesMut) -> anyhow::Result<Option<Message>> {
    loop {
        if let Some(msg) = Message::decode_framed(buf).map_err(|e| anyhow::anyhow!("{e:?}"))? {
            return Ok(Some(msg));
        }
        let mut chunk = [0u8; 4096];
        match recv.read(&mut chunk).await? {
            Some(n) if n > 0 => buf.extend_from_slice(&chunk[..n]),
            _ => return Ok(None),
        }
    }
}
