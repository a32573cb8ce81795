//! Wire format between the bot and the sidecar.
//!
//! One JSON object per line in both directions. The bot writes [`Request`]s
//! to the sidecar's stdin; the sidecar writes [`SidecarLine`]s to stdout,
//! either the answer to a request (matched by `id`) or an unsolicited event.

use {
    base64::{Engine, engine::general_purpose::STANDARD},
    serde::{Deserialize, Serialize},
    stickerbot_channels::{Error, Result, TransportEvent},
    stickerbot_common::MediaPayload,
};

/// A request written to the sidecar.
#[derive(Debug, Serialize)]
pub struct Request<'a> {
    pub id: String,
    #[serde(flatten)]
    pub call: Call<'a>,
}

/// Operations the sidecar understands.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Call<'a> {
    DownloadMedia {
        message_id: &'a str,
    },
    Reply {
        message_id: &'a str,
        text: &'a str,
    },
    SendText {
        chat_id: &'a str,
        text: &'a str,
    },
    SendSticker {
        chat_id: &'a str,
        media: WireMedia,
        name: &'a str,
        author: &'a str,
    },
    QuotedMessage {
        message_id: &'a str,
    },
}

impl Call<'_> {
    #[must_use]
    pub fn op(&self) -> &'static str {
        match self {
            Self::DownloadMedia { .. } => "download_media",
            Self::Reply { .. } => "reply",
            Self::SendText { .. } => "send_text",
            Self::SendSticker { .. } => "send_sticker",
            Self::QuotedMessage { .. } => "quoted_message",
        }
    }
}

/// A line read from the sidecar.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarLine {
    Response(Response),
    Event { event: TransportEvent },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    pub id: String,
    pub ok: bool,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default)]
    pub error: Option<String>,
}

impl Response {
    /// The result payload, or the sidecar's error as [`Error::Remote`].
    pub fn into_result(self) -> Result<serde_json::Value> {
        if self.ok {
            Ok(self.result)
        } else {
            Err(Error::remote(
                self.error.unwrap_or_else(|| "sidecar reported failure".into()),
            ))
        }
    }
}

/// Media with base64 data, as whatsapp-web.js `MessageMedia` carries it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMedia {
    pub mimetype: String,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl From<&MediaPayload> for WireMedia {
    fn from(media: &MediaPayload) -> Self {
        Self {
            mimetype: media.mimetype.clone(),
            data: STANDARD.encode(&media.data),
            filename: media.filename.clone(),
        }
    }
}

impl TryFrom<WireMedia> for MediaPayload {
    type Error = Error;

    fn try_from(wire: WireMedia) -> Result<Self> {
        let data = STANDARD
            .decode(wire.data.trim())
            .map_err(|e| Error::external("decoding media from sidecar", e))?;
        Ok(Self {
            mimetype: wire.mimetype,
            data,
            filename: wire.filename,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_flatten_the_operation() {
        let request = Request {
            id: "r1".into(),
            call: Call::Reply {
                message_id: "m1",
                text: "oi",
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["id"], "r1");
        assert_eq!(json["op"], "reply");
        assert_eq!(json["message_id"], "m1");
        assert_eq!(json["text"], "oi");
    }

    #[test]
    fn sticker_media_is_base64() {
        let media = MediaPayload::new("image/webp", b"RIFF".to_vec());
        let json = serde_json::to_value(Call::SendSticker {
            chat_id: "1@c.us",
            media: WireMedia::from(&media),
            name: "Pack",
            author: "Bot",
        })
        .unwrap();
        assert_eq!(json["op"], "send_sticker");
        assert_eq!(json["media"]["data"], "UklGRg==");
        assert!(json["media"].get("filename").is_none());
    }

    #[test]
    fn parses_responses_and_events() {
        let line: SidecarLine =
            serde_json::from_str(r#"{"type":"response","id":"r1","ok":false,"error":"boom"}"#)
                .unwrap();
        let SidecarLine::Response(response) = line else {
            panic!("expected a response");
        };
        assert!(matches!(response.into_result(), Err(Error::Remote { .. })));

        let line: SidecarLine = serde_json::from_str(
            r#"{"type":"event","event":{"kind":"qr","code":"2@abc"}}"#,
        )
        .unwrap();
        assert!(matches!(line, SidecarLine::Event {
            event: TransportEvent::Qr { .. }
        }));
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let wire = WireMedia {
            mimetype: "image/png".into(),
            data: "not base64!".into(),
            filename: None,
        };
        assert!(MediaPayload::try_from(wire).is_err());
    }
}
