use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    stickerbot_common::{InboundMessage, MediaPayload, StickerMetadata},
    tokio::sync::mpsc,
};

use crate::error::Result;

// ── Transport events ────────────────────────────────────────────────────────

/// Events a transport delivers to the bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportEvent {
    /// A chat message arrived.
    Message { message: InboundMessage },
    /// The bot was added to a group.
    GroupJoin { chat_id: String },
    /// Pairing code to scan with the phone app.
    Qr { code: String },
    /// Session restored or pairing completed.
    Ready,
    /// Connection lost; the transport may reconnect on its own.
    Disconnected { reason: String },
}

/// Sender side of the event stream a transport feeds.
pub type EventSender = mpsc::Sender<TransportEvent>;

/// Receiver side of the event stream.
pub type EventReceiver = mpsc::Receiver<TransportEvent>;

// ── Transport operations ────────────────────────────────────────────────────

/// Everything the pipeline needs from a chat platform.
///
/// Session and authentication handling stay inside the implementation.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Transport identifier (e.g. "whatsapp").
    fn id(&self) -> &str;

    /// Fetch the media attached to `message`. `None` when it carries none or
    /// the platform no longer has it.
    async fn download_media(&self, message: &InboundMessage) -> Result<Option<MediaPayload>>;

    /// Reply to `message` in its chat, quoting it.
    async fn reply(&self, message: &InboundMessage, text: &str) -> Result<()>;

    /// Send a plain text message to a chat.
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()>;

    /// Send `media` as a sticker with pack metadata.
    async fn send_sticker(
        &self,
        chat_id: &str,
        media: &MediaPayload,
        metadata: &StickerMetadata,
    ) -> Result<()>;

    /// The message `message` quotes, if any.
    async fn quoted_message(&self, message: &InboundMessage) -> Result<Option<InboundMessage>>;
}

/// Connection state as last reported by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransportStatus {
    pub connected: bool,
    pub details: Option<String>,
}

impl TransportStatus {
    /// Fold an event into the status; message events leave it unchanged.
    pub fn apply(&mut self, event: &TransportEvent) {
        match event {
            TransportEvent::Ready => {
                self.connected = true;
                self.details = None;
            },
            TransportEvent::Qr { .. } => {
                self.connected = false;
                self.details = Some("waiting for QR pairing".into());
            },
            TransportEvent::Disconnected { reason } => {
                self.connected = false;
                self.details = Some(reason.clone());
            },
            TransportEvent::Message { .. } | TransportEvent::GroupJoin { .. } => {},
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_use_kind_tag() {
        let event: TransportEvent = serde_json::from_str(
            r#"{"kind":"group_join","chat_id":"5511999999999-1600000000@g.us"}"#,
        )
        .unwrap();
        assert!(matches!(event, TransportEvent::GroupJoin { .. }));

        let json = serde_json::to_value(TransportEvent::Ready).unwrap();
        assert_eq!(json["kind"], "ready");
    }

    #[test]
    fn status_tracks_connection() {
        let mut status = TransportStatus::default();
        status.apply(&TransportEvent::Qr { code: "2@abc".into() });
        assert!(!status.connected);
        status.apply(&TransportEvent::Ready);
        assert!(status.connected);
        status.apply(&TransportEvent::Disconnected {
            reason: "LOGOUT".into(),
        });
        assert!(!status.connected);
        assert_eq!(status.details.as_deref(), Some("LOGOUT"));
    }
}
