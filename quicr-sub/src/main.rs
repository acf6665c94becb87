//! Subscribes to a QUICR/Q relay and writes the reassembled byte stream to
//! stdout in delivery order. A minimal stand-in for the teacher's
//! `moq-sub` media player: this crate demonstrates the receive side of the
//! wire protocol without decoding any particular container format
//! (`spec.md` §1 scopes sample-media file I/O to an external
//! collaborator, not the core).

use std::io::Write;
use std::net::SocketAddr;

use anyhow::Context;
use bytes::BytesMut;
use clap::Parser;
use url::Url;

use quicr_core::message::Message;
use quicr_core::reassembly::{Delivery, OrderMode, Reassembly};

#[derive(Parser, Clone)]
pub struct Cli {
    /// Listen for UDP packets on the given address.
    #[arg(long, default_value = "[::]:0")]
    pub bind: SocketAddr,

    /// The relay URL to subscribe to, e.g. `quicr://localhost:4443/stream`.
    pub url: Url,

    /// The TLS configuration.
    #[command(flatten)]
    pub tls: quicr_native::tls::Args,

    /// Subscribe over a datagram transport instead of a single stream.
    #[arg(long)]
    pub datagram: bool,

    /// Tolerate gaps: deliver placeholders instead of stalling on loss.
    #[arg(long)]
    pub skip_ahead: bool,
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

    let request = if cli.datagram {
        Message::RequestDatagram { url: cli.url.to_string() }
    } else {
        Message::RequestStream { url: cli.url.to_string() }
    };
    let mut framed = BytesMut::new();
    request.encode_framed(&mut framed)?;
    send.write(&framed).await.context("failed to send subscribe request")?;

    let mut inbound = BytesMut::new();
    let accept = read_message(&mut recv, &mut inbound).await?.context("connection closed before Accept")?;
    let Message::Accept { .. } = accept else {
        anyhow::bail!("expected Accept, got {accept:?}");
    };

    let order = if cli.skip_ahead { OrderMode::InOrderSkipGroupAhead } else { OrderMode::InOrder };
    let mut reassembly = Reassembly::new(order);
    let mut stdout = std::io::stdout().lock();

    loop {
        let Some(msg) = read_message(&mut recv, &mut inbound).await? else {
            return Ok(());
        };
        match msg {
            Message::Fragment { group, object, nb_objects_previous_group, offset, last, flags, data } => {
                let mut delivered = Vec::new();
                reassembly.input(group, object, offset, last, flags, nb_objects_previous_group, data, &mut |d: Delivery| {
                    delivered.push(d)
                });
                for d in delivered {
                    if !d.is_placeholder {
                        stdout.write_all(&d.data)?;
                    }
                }
            }
            Message::FinDatagram { final_group, final_object } => {
                reassembly.learn_final(final_group, final_object);
                if reassembly.is_finished() {
                    return Ok(());
                }
            }
            Message::StartPoint { group, object } => reassembly.learn_start(group, object),
            _ => {}
        }
    }
}

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
