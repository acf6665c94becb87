//! Cache-fill and publish-upstream fan-out to a configured parent relay
//! (`spec.md` §4.8: "open an upstream subscription on the relay's parent
//! connection" / "Relay publish-upstream"). The hard-core decision of
//! *whether* to fill ("CreatedNeedsUpstream") lives in
//! `quicr_core::fanout::SourceRegistry`; this module is the ambient wiring
//! that acts on it over a real QUIC connection, grounded on the teacher's
//! `moq-relay-ietf::producer` remote-routing shape (with the remote
//! origin-lookup service dropped per `DESIGN.md`, replaced by one
//! statically configured parent).

use bytes::BytesMut;
use url::Url;

use quicr_core::message::{CachePolicy, Message, TransportMode};

use crate::local::Locals;

/// A single statically configured parent relay, dialed on demand whenever a
/// local source needs filling or a local publish must be mirrored upstream.
#[derive(Clone)]
pub struct Upstream {
    client: Option<quicr_native::quic::Client>,
    parent: Option<Url>,
}

impl Upstream {
    pub fn new(client: quicr_native::quic::Client, parent: Option<Url>) -> Self {
        Self { client: Some(client), parent }
    }

    pub fn none() -> Self {
        Self { client: None, parent: None }
    }

    fn enabled(&self) -> bool {
        self.client.is_some() && self.parent.is_some()
    }

    /// `spec.md` §4.8 step 2: the registry just created an empty cache for
    /// `url` and needs it filled from upstream. Spawns a task that
    /// subscribes to the parent and feeds every received fragment and
    /// start/end point into the local cache via `registry`'s fan-out
    /// propagation, which in turn wakes every downstream subscriber.
    pub fn spawn_fill(&self, url: String, registry: Locals) {
        if !self.enabled() {
            // No parent configured: this relay is an origin. The cache
            // stays empty until a local publisher posts into it.
            return;
        }
        let client = self.client.clone().unwrap();
        let parent = self.parent.clone().unwrap();

        tokio::spawn(async move {
            if let Err(err) = fill_from_parent(client, parent, url.clone(), registry.clone()).await {
                log::warn!("upstream fill for {url} failed: {err}");
                registry.lock().mark_feed_closed(&url);
            }
        });
    }

    /// `spec.md` §4.8, "Relay publish-upstream": a local POST should be
    /// mirrored to the origin so it observes the same data. Spawns a task
    /// that opens an upstream POST and forwards fragments as they arrive
    /// on `rx`.
    pub fn spawn_publish(&self, url: String, mut rx: tokio::sync::mpsc::UnboundedReceiver<Message>) {
        if !self.enabled() {
            return;
        }
        let client = self.client.clone().unwrap();
        let parent = self.parent.clone().unwrap();

        tokio::spawn(async move {
            if let Err(err) = publish_to_parent(client, parent, url.clone(), &mut rx).await {
                log::warn!("upstream publish for {url} failed: {err}");
            }
        });
    }
}

async fn fill_from_parent(
    client: quicr_native::quic::Client,
    parent: Url,
    url: String,
    registry: Locals,
) -> anyhow::Result<()> {
    let (session, cid) = client.connect(&parent).await?;
    log::info!("opened upstream fill for {url}: cid={cid}");
    let (mut send, mut recv) = session.open_bi().await?;

    let request = Message::RequestStream { url: url.clone() };
    let mut framed = BytesMut::new();
    request.encode_framed(&mut framed)?;
    send.write(&framed).await?;

    let mut inbound = BytesMut::new();
    let accept = read_message(&mut recv, &mut inbound).await?;
    if !matches!(accept, Some(Message::Accept { .. })) {
        anyhow::bail!("expected Accept from parent, got {accept:?}");
    }

    loop {
        let Some(msg) = read_message(&mut recv, &mut inbound).await? else {
            registry.lock().mark_feed_closed(&url);
            return Ok(());
        };
        match msg {
            Message::Fragment { group, object, nb_objects_previous_group, offset, last, flags, data } => {
                let end = offset + data.len() as u64;
                let object_length = if last { end } else { u64::MAX };
                let mut guard = registry.lock();
                if let Some(source) = guard.get_mut(&url) {
                    source.cache.propose(data, group, object, offset, 0, flags, nb_objects_previous_group, object_length, 0)?;
                }
            }
            Message::StartPoint { group, object } => {
                registry.lock().propagate_start_point(&url, group, object);
            }
            Message::FinDatagram { final_group, final_object } => {
                let mut guard = registry.lock();
                guard.propagate_end_point(&url, final_group, final_object);
                guard.mark_feed_closed(&url);
            }
            _ => {}
        }
    }
}

async fn publish_to_parent(
    client: quicr_native::quic::Client,
    parent: Url,
    url: String,
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<Message>,
) -> anyhow::Result<()> {
    let (session, cid) = client.connect(&parent).await?;
    log::info!("opened upstream publish for {url}: cid={cid}");
    let (mut send, mut recv) = session.open_bi().await?;

    let post = Message::Post {
        url: url.clone(),
        transport: TransportMode::SingleStream,
        cache_policy: CachePolicy::default(),
        start_group: 0,
        start_object: 0,
    };
    let mut framed = BytesMut::new();
    post.encode_framed(&mut framed)?;
    send.write(&framed).await?;

    let mut inbound = BytesMut::new();
    let accept = read_message(&mut recv, &mut inbound).await?;
    if !matches!(accept, Some(Message::Accept { .. })) {
        anyhow::bail!("expected Accept from parent, got {accept:?}");
    }

    while let Some(msg) = rx.recv().await {
        let mut framed = BytesMut::new();
        msg.encode_framed(&mut framed)?;
        send.write(&framed).await?;
    }
    Ok(())
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
