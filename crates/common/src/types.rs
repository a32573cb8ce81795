//! Message and media types shared between the transport, the pipeline and the
//! conversion engine.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Suffix of group chat identities on the chat platform.
pub const GROUP_SUFFIX: &str = "@g.us";

/// An inbound chat message as delivered by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Serialized platform message id.
    pub id: String,
    /// Chat the message arrived in (user id for private chats, group id otherwise).
    pub from: String,
    /// Participant that wrote the message, set only in group chats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default)]
    pub body: String,
    /// Declared platform type (`chat`, `image`, `video`, ...). Parsed into
    /// [`MessageType`] by the validator.
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub has_media: bool,
    #[serde(default)]
    pub has_quoted_msg: bool,
    /// Unix seconds.
    #[serde(default)]
    pub timestamp: i64,
}

impl InboundMessage {
    #[must_use]
    pub fn is_group(&self) -> bool {
        self.from.ends_with(GROUP_SUFFIX)
    }

    /// Identity used for rate limiting and attribution.
    #[must_use]
    pub fn sender(&self) -> &str {
        self.author.as_deref().unwrap_or(&self.from)
    }

    /// Where replies and stickers are sent.
    #[must_use]
    pub fn chat_id(&self) -> &str {
        &self.from
    }

    /// Body cut to `max` characters for logging.
    #[must_use]
    pub fn body_preview(&self, max: usize) -> &str {
        match self.body.char_indices().nth(max) {
            Some((idx, _)) => &self.body[..idx],
            None => &self.body,
        }
    }
}

/// Fixed enumeration of declared message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Chat,
    Image,
    Video,
    Audio,
    Document,
    Sticker,
    Location,
    Contact,
    Notification,
}

impl MessageType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Sticker => "sticker",
            Self::Location => "location",
            Self::Contact => "contact",
            Self::Notification => "notification",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "chat" => Self::Chat,
            "image" => Self::Image,
            "video" => Self::Video,
            "audio" | "ptt" => Self::Audio,
            "document" => Self::Document,
            "sticker" => Self::Sticker,
            "location" => Self::Location,
            "contact" | "vcard" | "multi_vcard" => Self::Contact,
            "notification" | "notification_template" => Self::Notification,
            other => return Err(format!("unknown message type: {other}")),
        })
    }
}

/// Downloaded media bytes plus their declared mimetype.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaPayload {
    pub mimetype: String,
    pub data: Vec<u8>,
    pub filename: Option<String>,
}

impl MediaPayload {
    #[must_use]
    pub fn new(mimetype: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mimetype: mimetype.into(),
            data,
            filename: None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Mimetype without parameters, lowercased (`video/mp4; codecs=..` → `video/mp4`).
    #[must_use]
    pub fn essence(&self) -> String {
        self.mimetype
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
    }
}

impl fmt::Debug for MediaPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaPayload")
            .field("mimetype", &self.mimetype)
            .field("bytes", &self.data.len())
            .field("filename", &self.filename)
            .finish()
    }
}

/// Pack name and author embedded in every sent sticker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickerMetadata {
    pub name: String,
    pub author: String,
}

impl Default for StickerMetadata {
    fn default() -> Self {
        Self {
            name: "Sticker Bot".into(),
            author: "WhatsApp Sticker Bot".into(),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn message(from: &str) -> InboundMessage {
        InboundMessage {
            id: "true_5511999999999@c.us_ABC".into(),
            from: from.into(),
            message_type: "chat".into(),
            ..Default::default()
        }
    }

    #[test]
    fn group_detection_uses_suffix() {
        assert!(message("5511999999999-1600000000@g.us").is_group());
        assert!(!message("5511999999999@c.us").is_group());
    }

    #[test]
    fn sender_prefers_group_author() {
        let mut msg = message("5511999999999-1600000000@g.us");
        assert_eq!(msg.sender(), "5511999999999-1600000000@g.us");
        msg.author = Some("5511888888888@c.us".into());
        assert_eq!(msg.sender(), "5511888888888@c.us");
        assert_eq!(msg.chat_id(), "5511999999999-1600000000@g.us");
    }

    #[test]
    fn body_preview_respects_char_boundaries() {
        let mut msg = message("5511999999999@c.us");
        msg.body = "ééééé".into();
        assert_eq!(msg.body_preview(3), "ééé");
        assert_eq!(msg.body_preview(100), "ééééé");
    }

    #[test]
    fn message_type_aliases() {
        assert_eq!("vcard".parse::<MessageType>().unwrap(), MessageType::Contact);
        assert_eq!(
            "notification_template".parse::<MessageType>().unwrap(),
            MessageType::Notification
        );
        assert!("poll_creation".parse::<MessageType>().is_err());
    }

    #[test]
    fn media_essence_strips_parameters() {
        let media = MediaPayload::new("Video/MP4; codecs=avc1", vec![1, 2, 3]);
        assert_eq!(media.essence(), "video/mp4");
        assert_eq!(media.len(), 3);
    }

    #[test]
    fn inbound_message_wire_shape() {
        let msg: InboundMessage = serde_json::from_str(
            r#"{"id":"m1","from":"5511999999999@c.us","body":"!ajuda","type":"chat","timestamp":1}"#,
        )
        .unwrap();
        assert_eq!(msg.message_type, "chat");
        assert!(!msg.has_media);
        assert!(msg.author.is_none());
    }
}
