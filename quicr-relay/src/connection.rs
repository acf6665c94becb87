use bytes::BytesMut;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};

use quicr_core::control::{SendDirtyFlags, SendState, SubscriberStream};
use quicr_core::message::{Message, TransportMode};
use quicr_core::publisher::{Congestion, PublisherContext};
use quicr_core::scheduler;

use crate::local::Locals;
use crate::upstream::Upstream;

/// One accepted WebTransport session, serving every control stream the peer
/// opens on it against the shared source registry.
pub struct Connection {
    session: web_transport::Session,
    registry: Locals,
    upstream: Upstream,
}

impl Connection {
    pub fn new(session: web_transport::Session, registry: Locals, upstream: Upstream) -> Self {
        Self { session, registry, upstream }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut streams: FuturesUnordered<futures::future::BoxFuture<'static, ()>> = FuturesUnordered::new();

        loop {
            tokio::select! {
                res = self.session.accept_bi() => {
                    let (send, recv) = res?;
                    let registry = self.registry.clone();
                    let upstream = self.upstream.clone();
                    streams.push(async move {
                        if let Err(err) = serve_control_stream(send, recv, registry, upstream).await {
                            log::warn!("control stream closed with error: {err}");
                        }
                    }.boxed());
                },
                _ = streams.next(), if !streams.is_empty() => {},
                else => return Ok(()),
            }
        }
    }
}

async fn serve_control_stream(
    send: web_transport::SendStream,
    mut recv: web_transport::RecvStream,
    registry: Locals,
    upstream: Upstream,
) -> anyhow::Result<()> {
    let mut inbound = BytesMut::new();
    let first = read_message(&mut recv, &mut inbound).await?;

    match first {
        Some(Message::RequestStream { url }) => {
            serve_subscribe(send, recv, registry, upstream, url, TransportMode::SingleStream).await
        }
        Some(Message::RequestDatagram { url }) => {
            serve_subscribe(send, recv, registry, upstream, url, TransportMode::Datagram).await
        }
        Some(Message::Post { url, transport, .. }) => serve_publish(send, recv, registry, upstream, url, transport, inbound).await,
        Some(other) => {
            log::warn!("unexpected first control message: {other:?}");
            Ok(())
        }
        None => Ok(()),
    }
}

/// Read frames off `recv` until a complete [`Message`] is decodable, or the
/// stream ends.
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

async fn serve_publish(
    mut send: web_transport::SendStream,
    mut recv: web_transport::RecvStream,
    registry: Locals,
    upstream: Upstream,
    url: String,
    _transport: TransportMode,
    mut inbound: BytesMut,
) -> anyhow::Result<()> {
    {
        let mut guard = registry.lock();
        guard.publish(&url);
    }
    log::info!("publishing: {url}");

    // `spec.md` §4.8, "Relay publish-upstream": mirror every fragment to
    // the configured parent as it arrives, so the origin observes the same
    // data this relay is caching for its own downstream subscribers.
    let (upstream_tx, upstream_rx) = tokio::sync::mpsc::unbounded_channel();
    upstream.spawn_publish(url.clone(), upstream_rx);

    let accept = Message::Accept { transport: TransportMode::SingleStream, media_id: 0 };
    let mut framed = BytesMut::new();
    accept.encode_framed(&mut framed)?;
    send.write(&framed).await?;

    loop {
        match read_message(&mut recv, &mut inbound).await? {
            Some(Message::Fragment { group, object, nb_objects_previous_group, offset, last, flags, data }) => {
                let length = offset + data.len() as u64;
                {
                    let mut guard = registry.lock();
                    if let Some(source) = guard.get_mut(&url) {
                        let object_length = if last { length } else { u64::MAX };
                        source.cache.propose(data.clone(), group, object, offset, 0, flags, nb_objects_previous_group, object_length, 0)?;
                    }
                }
                let msg = Message::Fragment { group, object, nb_objects_previous_group, offset, last, flags, data };
                let _ = upstream_tx.send(msg);
            }
            Some(Message::FinDatagram { final_group, final_object }) => {
                {
                    let mut guard = registry.lock();
                    guard.propagate_end_point(&url, final_group, final_object);
                    guard.mark_feed_closed(&url);
                }
                let msg = Message::FinDatagram { final_group, final_object };
                let _ = upstream_tx.send(msg);
            }
            Some(_) => {}
            None => {
                registry.lock().mark_feed_closed(&url);
                return Ok(());
            }
        }
    }
}

async fn serve_subscribe(
    mut send: web_transport::SendStream,
    _recv: web_transport::RecvStream,
    registry: Locals,
    upstream: Upstream,
    url: String,
    transport_mode: TransportMode,
) -> anyhow::Result<()> {
    let outcome = registry.lock().subscribe(&url, 0);
    log::info!("subscribing: {url} ({outcome:?})");
    if outcome == quicr_core::fanout::SubscribeOutcome::CreatedNeedsUpstream {
        upstream.spawn_fill(url.clone(), registry.clone());
    }

    let accept = Message::Accept { transport: transport_mode, media_id: 0 };
    let mut framed = BytesMut::new();
    accept.encode_framed(&mut framed)?;
    send.write(&framed).await?;

    let mut stream_state = SubscriberStream::new(0, 0, transport_mode);
    let mut ctx = PublisherContext::new(0, 0, Congestion::None);
    let mut seen_epoch = 0;

    loop {
        let notify = {
            let guard = registry.lock();
            let Some(source) = guard.get(&url) else {
                return Ok(());
            };
            source.notify.clone()
        };

        let had_data = {
            let guard = registry.lock();
            let Some(source) = guard.get(&url) else {
                return Ok(());
            };
            let mut out = BytesMut::new();
            loop_pump(&mut ctx, &source.cache, &mut out);
            if !out.is_empty() {
                Some(out)
            } else {
                None
            }
        };

        if let Some(out) = had_data {
            send.write(&out).await?;
            stream_state.step_send(SendDirtyFlags { has_stream_data: true, ..Default::default() });
            continue;
        }

        if stream_state.send_state == SendState::NoMore {
            let closed = registry.lock().get(&url).map(|s| s.cache.cursors.is_feed_closed).unwrap_or(true);
            if closed {
                return Ok(());
            }
        }

        notify.wait_for_change(seen_epoch).await;
        seen_epoch = notify.epoch();
    }
}

/// Drain everything the sequential walker currently has ready into `out`,
/// framed one [`Message::Fragment`] at a time (`scheduler::pump_single_stream`
/// needs a live `StreamTransport`; this buffers into bytes instead since the
/// control stream here writes synchronously rather than through an actor).
fn loop_pump(ctx: &mut PublisherContext, cache: &quicr_core::cache::FragmentCache, out: &mut BytesMut) {
    struct BufferTransport<'a> {
        out: &'a mut BytesMut,
        active: bool,
    }
    impl<'a> quicr_core::transport::StreamTransport for BufferTransport<'a> {
        fn stream_id(&self) -> u64 {
            0
        }
        fn queue_data(&mut self, data: bytes::Bytes, _more_to_send: bool) {
            self.out.extend_from_slice(&data);
        }
        fn set_active(&mut self, active: bool) {
            self.active = active;
        }
        fn close(&mut self, _error_code: u64) {}
    }

    let mut transport = BufferTransport { out, active: false };
    scheduler::pump_single_stream(ctx, cache, &mut transport, 64 * 1024);
}
