//! [`ChatTransport`] over the sidecar's stdio.

use std::{
    sync::{Arc, Mutex as StdMutex, PoisonError},
    time::Duration,
};

use {
    async_trait::async_trait,
    dashmap::DashMap,
    stickerbot_channels::{
        ChatTransport, Error, EventSender, Result, TransportEvent, TransportStatus,
    },
    stickerbot_common::{InboundMessage, MediaPayload, StickerMetadata},
    tokio::{
        io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
        sync::{Mutex, oneshot},
        task::JoinHandle,
    },
    tracing::{debug, info, trace, warn},
    uuid::Uuid,
};

use crate::{
    process::{SidecarConfig, SidecarProcess, start_sidecar},
    protocol::{Call, Request, Response, SidecarLine, WireMedia},
};

type PendingMap = DashMap<String, oneshot::Sender<Response>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// WhatsApp Web transport driven through the Node.js sidecar.
pub struct WhatsAppTransport {
    writer: Mutex<Writer>,
    pending: Arc<PendingMap>,
    status: Arc<StdMutex<TransportStatus>>,
    request_timeout: Duration,
    process: Mutex<Option<SidecarProcess>>,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

impl WhatsAppTransport {
    /// Start the sidecar and attach to its stdio.
    pub async fn spawn(
        config: &SidecarConfig,
        request_timeout: Duration,
        events: EventSender,
    ) -> anyhow::Result<Arc<Self>> {
        let spawned = start_sidecar(config).await?;
        let transport = Self::from_io(spawned.stdout, spawned.stdin, request_timeout, events);
        *transport.process.lock().await = Some(spawned.process);
        Ok(transport)
    }

    /// Attach to an already connected sidecar stream.
    pub fn from_io<R, W>(
        reader: R,
        writer: W,
        request_timeout: Duration,
        events: EventSender,
    ) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: Arc<PendingMap> = Arc::new(DashMap::new());
        let status = Arc::new(StdMutex::new(TransportStatus::default()));
        let handle = tokio::spawn(read_loop(
            reader,
            Arc::clone(&pending),
            Arc::clone(&status),
            events,
        ));

        Arc::new(Self {
            writer: Mutex::new(Box::new(writer)),
            pending,
            status,
            request_timeout,
            process: Mutex::new(None),
            reader: StdMutex::new(Some(handle)),
        })
    }

    /// Connection state as last reported by the sidecar.
    #[must_use]
    pub fn status(&self) -> TransportStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Requests still waiting for an answer.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Stop reading and shut the sidecar down.
    pub async fn shutdown(&self) {
        if let Some(mut process) = self.process.lock().await.take()
            && let Err(e) = process.stop().await
        {
            warn!(error = %e, "failed to stop WhatsApp sidecar");
        }
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = reader {
            handle.abort();
        }
        self.pending.clear();
    }

    async fn request(&self, call: Call<'_>) -> Result<serde_json::Value> {
        let op = call.op();
        let id = Uuid::new_v4().to_string();
        let mut payload = serde_json::to_string(&Request {
            id: id.clone(),
            call,
        })?;
        payload.push('\n');

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);
        trace!(op, id = %id, "bot -> sidecar");

        {
            let mut writer = self.writer.lock().await;
            let written = async {
                writer.write_all(payload.as_bytes()).await?;
                writer.flush().await
            }
            .await;
            if let Err(e) = written {
                self.pending.remove(&id);
                return Err(Error::unavailable(format!("writing to sidecar: {e}")));
            }
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response.into_result(),
            Ok(Err(_)) => Err(Error::unavailable(format!(
                "sidecar closed before answering {op}"
            ))),
            Err(_) => {
                self.pending.remove(&id);
                warn!(
                    op,
                    id = %id,
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "sidecar request timed out"
                );
                Err(Error::Timeout {
                    operation: op.into(),
                })
            },
        }
    }
}

async fn read_loop<R>(
    reader: R,
    pending: Arc<PendingMap>,
    status: Arc<StdMutex<TransportStatus>>,
    events: EventSender,
) where
    R: AsyncRead + Send + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut forwarding = true;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("sidecar stdout closed");
                break;
            },
            Err(e) => {
                warn!(error = %e, "error reading from sidecar stdout");
                break;
            },
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<SidecarLine>(trimmed) {
            Ok(SidecarLine::Response(response)) => match pending.remove(&response.id) {
                Some((_, tx)) => {
                    let _ = tx.send(response);
                },
                None => warn!(id = %response.id, "response for unknown request id"),
            },
            Ok(SidecarLine::Event { event }) => {
                status
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .apply(&event);
                if forwarding && events.send(event).await.is_err() {
                    debug!("event receiver dropped, no longer forwarding sidecar events");
                    forwarding = false;
                }
            },
            Err(e) => {
                debug!(error = %e, line = %trimmed, "sidecar sent an unrecognized line");
            },
        }
    }

    // Waiters see a closed channel instead of running into the timeout.
    pending.clear();
    let closed = TransportEvent::Disconnected {
        reason: "sidecar exited".into(),
    };
    status
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .apply(&closed);
    if forwarding {
        let _ = events.send(closed).await;
    }
    info!("WhatsApp sidecar stream ended");
}

#[async_trait]
impl ChatTransport for WhatsAppTransport {
    fn id(&self) -> &str {
        "whatsapp"
    }

    async fn download_media(&self, message: &InboundMessage) -> Result<Option<MediaPayload>> {
        if !message.has_media {
            return Ok(None);
        }
        let value = self
            .request(Call::DownloadMedia {
                message_id: &message.id,
            })
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        let wire: WireMedia = serde_json::from_value(value)?;
        MediaPayload::try_from(wire).map(Some)
    }

    async fn reply(&self, message: &InboundMessage, text: &str) -> Result<()> {
        self.request(Call::Reply {
            message_id: &message.id,
            text,
        })
        .await
        .map(drop)
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()> {
        self.request(Call::SendText { chat_id, text })
            .await
            .map(drop)
    }

    async fn send_sticker(
        &self,
        chat_id: &str,
        media: &MediaPayload,
        metadata: &StickerMetadata,
    ) -> Result<()> {
        if media.is_empty() {
            return Err(Error::invalid_input("sticker payload is empty"));
        }
        self.request(Call::SendSticker {
            chat_id,
            media: WireMedia::from(media),
            name: &metadata.name,
            author: &metadata.author,
        })
        .await
        .map(drop)
    }

    async fn quoted_message(&self, message: &InboundMessage) -> Result<Option<InboundMessage>> {
        if !message.has_quoted_msg {
            return Ok(None);
        }
        let value = self
            .request(Call::QuotedMessage {
                message_id: &message.id,
            })
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        serde_json::{Value, json},
        tokio::{
            io::{DuplexStream, duplex, split},
            sync::mpsc,
        },
    };

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Serve requests on the sidecar end of the stream with `answer`.
    fn fake_sidecar<F>(stream: DuplexStream, answer: F) -> JoinHandle<Vec<Value>>
    where
        F: Fn(&Value) -> Option<Value> + Send + 'static,
    {
        tokio::spawn(async move {
            let (read, mut write) = split(stream);
            let mut lines = BufReader::new(read).lines();
            let mut seen = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: Value = serde_json::from_str(&line).unwrap();
                if let Some(reply) = answer(&request) {
                    let mut out = reply.to_string();
                    out.push('\n');
                    write.write_all(out.as_bytes()).await.unwrap();
                }
                seen.push(request);
            }
            seen
        })
    }

    fn ok(request: &Value, result: Value) -> Value {
        json!({"type": "response", "id": request["id"], "ok": true, "result": result})
    }

    type Connected = (
        Arc<WhatsAppTransport>,
        DuplexStream,
        mpsc::Receiver<TransportEvent>,
    );

    fn connect(timeout: Duration) -> Connected {
        let (bot, sidecar) = duplex(64 * 1024);
        let (read, write) = split(bot);
        let (tx, rx) = mpsc::channel(16);
        let transport = WhatsAppTransport::from_io(read, write, timeout, tx);
        (transport, sidecar, rx)
    }

    fn message(id: &str) -> InboundMessage {
        InboundMessage {
            id: id.into(),
            from: "5511999999999@c.us".into(),
            message_type: "image".into(),
            has_media: true,
            has_quoted_msg: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn reply_is_correlated_by_id() {
        let (transport, sidecar, _events) = connect(TIMEOUT);
        let server = fake_sidecar(sidecar, |req| Some(ok(req, Value::Null)));

        transport.reply(&message("m1"), "olá").await.unwrap();
        assert_eq!(transport.pending_requests(), 0);

        drop(transport);
        let seen = server.await.unwrap();
        assert_eq!(seen[0]["op"], "reply");
        assert_eq!(seen[0]["message_id"], "m1");
        assert_eq!(seen[0]["text"], "olá");
    }

    #[tokio::test]
    async fn media_is_decoded() {
        let (transport, sidecar, _events) = connect(TIMEOUT);
        let _server = fake_sidecar(sidecar, |req| {
            Some(ok(req, json!({"mimetype": "image/png", "data": "iVBORw=="})))
        });

        let media = transport.download_media(&message("m1")).await.unwrap().unwrap();
        assert_eq!(media.mimetype, "image/png");
        assert_eq!(media.data, vec![0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn missing_media_and_quotes_are_none() {
        let (transport, sidecar, _events) = connect(TIMEOUT);
        let _server = fake_sidecar(sidecar, |req| Some(ok(req, Value::Null)));

        assert!(transport.download_media(&message("m1")).await.unwrap().is_none());
        assert!(transport.quoted_message(&message("m1")).await.unwrap().is_none());

        let mut plain = message("m2");
        plain.has_media = false;
        assert!(transport.download_media(&plain).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn quoted_message_is_parsed() {
        let (transport, sidecar, _events) = connect(TIMEOUT);
        let _server = fake_sidecar(sidecar, |req| {
            Some(ok(
                req,
                json!({"id": "q1", "from": "1-2@g.us", "type": "video", "has_media": true}),
            ))
        });

        let quoted = transport.quoted_message(&message("m1")).await.unwrap().unwrap();
        assert_eq!(quoted.id, "q1");
        assert_eq!(quoted.message_type, "video");
        assert!(quoted.has_media);
    }

    #[tokio::test]
    async fn remote_errors_surface() {
        let (transport, sidecar, _events) = connect(TIMEOUT);
        let _server = fake_sidecar(sidecar, |req| {
            Some(json!({"type": "response", "id": req["id"], "ok": false, "error": "chat not found"}))
        });

        let err = transport.send_text("1@c.us", "oi").await.unwrap_err();
        assert!(matches!(err, Error::Remote { .. }));
        assert!(err.to_string().contains("chat not found"));
    }

    #[tokio::test]
    async fn unanswered_requests_time_out() {
        let (transport, sidecar, _events) = connect(Duration::from_millis(50));
        let _server = fake_sidecar(sidecar, |_| None);

        let err = transport.send_text("1@c.us", "oi").await.unwrap_err();
        assert!(matches!(err, Error::Timeout { ref operation } if operation == "send_text"));
        assert_eq!(transport.pending_requests(), 0);
    }

    #[tokio::test]
    async fn empty_stickers_are_refused_locally() {
        let (transport, sidecar, _events) = connect(TIMEOUT);
        let server = fake_sidecar(sidecar, |req| Some(ok(req, Value::Null)));

        let err = transport
            .send_sticker(
                "1@c.us",
                &MediaPayload::new("image/webp", Vec::new()),
                &StickerMetadata::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));

        drop(transport);
        assert!(server.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn events_are_forwarded_and_tracked() {
        let (transport, mut sidecar, mut events) = connect(TIMEOUT);

        sidecar
            .write_all(b"{\"type\":\"event\",\"event\":{\"kind\":\"ready\"}}\nnot json\n")
            .await
            .unwrap();
        sidecar
            .write_all(
                br#"{"type":"event","event":{"kind":"group_join","chat_id":"1-2@g.us"}}
"#,
            )
            .await
            .unwrap();

        assert!(matches!(events.recv().await.unwrap(), TransportEvent::Ready));
        assert!(matches!(
            events.recv().await.unwrap(),
            TransportEvent::GroupJoin { chat_id } if chat_id == "1-2@g.us"
        ));
        assert!(transport.status().connected);

        drop(sidecar);
        assert!(matches!(
            events.recv().await.unwrap(),
            TransportEvent::Disconnected { .. }
        ));
        assert!(!transport.status().connected);
    }

    #[tokio::test]
    async fn closed_sidecar_fails_requests() {
        let (transport, sidecar, _events) = connect(TIMEOUT);
        drop(sidecar);
        let err = transport.send_text("1@c.us", "oi").await.unwrap_err();
        assert!(matches!(err, Error::Unavailable { .. }));
    }
}
