//! Publishes stdin to a QUICR/Q relay as a single growing group, one
//! fragment per chunk read. A minimal stand-in for the teacher's
//! `moq-pub` fMP4 ingest: this crate demonstrates the wire protocol
//! end to end without parsing any particular media container
//! (`spec.md` §1 scopes sample-media file I/O to an external
//! collaborator, not the core).

use std::io::Read;
use std::net::SocketAddr;

use anyhow::Context;
use bytes::{Bytes, BytesMut};
use clap::Parser;
use url::Url;

use quicr_core::message::{CachePolicy, Message, TransportMode};

const CHUNK_SIZE: usize = 32 * 1024;

#[derive(Parser, Clone)]
pub struct Cli {
    /// Listen for UDP packets on the given address.
    #[arg(long, default_value = "[::]:0")]
    pub bind: SocketAddr,

    /// The relay URL to publish to, e.g. `quicr://localhost:4443/stream`.
    pub url: Url,

    /// The TLS configuration.
    #[command(flatten)]
    pub tls: quicr_native::tls::Args,

    /// Publish over a datagram transport instead of a single stream.
    #[arg(long)]
    pub datagram: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let tracer = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::WARN)
        .finish();
    tracing::subscriber::set_global_default(tracer).unwrap();

    let cli = Cli::parse();

    let quic_config = quicr_native::quic::Args {
        bind: cli.bind,
        qlog_dir: None,
        tls: cli.tls,
    }
    .load()?;

    let endpoint = quicr_native::quic::Endpoint::new(quic_config)?;
    let (session, cid) = endpoint.client.connect(&cli.url).await?;
    log::info!("connected: cid={cid}");

    let (mut send, mut recv) = session.open_bi().await.context("failed to open control stream")?;

    let transport = if cli.datagram { TransportMode::Datagram } else { TransportMode::SingleStream };
    let post = Message::Post {
        url: cli.url.to_string(),
        transport,
        cache_policy: CachePolicy::default(),
        start_group: 0,
        start_object: 0,
    };
    let mut framed = BytesMut::new();
    post.encode_framed(&mut framed)?;
    send.write(&framed).await.context("failed to send Post")?;

    let accept = read_one(&mut recv).await?.context("connection closed before Accept")?;
    let Message::Accept { .. } = accept else {
        anyhow::bail!("expected Accept, got {accept:?}");
    };

    // Blocking stdin reads run on a dedicated thread; chunks are forwarded
    // to the async publish loop over a channel.
    let (tx, mut rx) = tokio::sync::mpsc::channel::<Bytes>(8);
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin().lock();
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(n) => {
                    if tx.blocking_send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                        return;
                    }
                }
            }
        }
    });

    let group = 0u64;
    let mut object = 0u64;
    while let Some(data) = rx.recv().await {
        let msg = Message::Fragment {
            group,
            object,
            nb_objects_previous_group: 0,
            offset: 0,
            last: true,
            flags: 0,
            data,
        };
        let mut framed = BytesMut::new();
        msg.encode_framed(&mut framed)?;
        send.write(&framed).await.context("failed to send fragment")?;
        object += 1;
    }

    let fin = Message::FinDatagram { final_group: group, final_object: object.saturating_sub(1) };
    let mut framed = BytesMut::new();
    fin.encode_framed(&mut framed)?;
    send.write(&framed).await.context("failed to send FinDatagram")?;

    log::info!("published {object} fragments");
    Ok(())
}

async fn read_one(recv: &mut web_transport::RecvStream) -> anyhow::Result<Option<Message>> {
    let mut buf = BytesMut::new();
    loop {
        if let Some(msg) = Message::decode_framed(&mut buf).map_err(|e| anyhow::anyhow!("{e:?}"))? {
            return Ok(Some(msg));
        }
        let mut chunk = [0u8; 4096];
        match recv.read(&mut chunk).await? {
            Some(n) if n > 0 => buf.extend_from_slice(&chunk[..n]),
            _ => return Ok(None),
        }
    }
}
