//! The conversion engine: one entry point over the three sticker variants.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use {
    serde::Serialize,
    stickerbot_common::MediaPayload,
    tracing::{info, warn},
};

use {
    crate::{
        animated::Transcoder,
        error::{Error, Result},
        image_ops::{self, STICKER_MIMETYPE},
        options::ConversionOptions,
        text::TextRenderer,
    },
    stickerbot_metrics::{histogram, stickers},
};

/// Which conversion algorithm a job needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    StaticImage,
    Text,
    AnimatedMedia,
}

impl Variant {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StaticImage => "static_image",
            Self::Text => "text",
            Self::AnimatedMedia => "animated_media",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input of one conversion.
#[derive(Debug, Clone)]
pub enum StickerSource {
    StaticImage(MediaPayload),
    Text(String),
    AnimatedMedia(MediaPayload),
}

impl StickerSource {
    /// Pick the variant for downloaded media by its declared mimetype.
    ///
    /// GIFs and videos are animated; the remaining whitelisted images are
    /// static. Anything else is unsupported.
    pub fn from_media(media: MediaPayload) -> Result<Self> {
        let essence = media.essence();
        match essence.as_str() {
            "image/gif" => Ok(Self::AnimatedMedia(media)),
            m if m.starts_with("video/") => Ok(Self::AnimatedMedia(media)),
            "image/jpeg" | "image/png" | "image/webp" => Ok(Self::StaticImage(media)),
            _ => Err(Error::UnsupportedFormat { mimetype: essence }),
        }
    }

    #[must_use]
    pub fn variant(&self) -> Variant {
        match self {
            Self::StaticImage(_) => Variant::StaticImage,
            Self::Text(_) => Variant::Text,
            Self::AnimatedMedia(_) => Variant::AnimatedMedia,
        }
    }
}

/// Encoded sticker.
#[derive(Clone)]
pub struct ConversionResult {
    pub data: Vec<u8>,
    /// Always [`STICKER_MIMETYPE`].
    pub mimetype: &'static str,
    pub duration: Duration,
}

impl fmt::Debug for ConversionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionResult")
            .field("bytes", &self.data.len())
            .field("mimetype", &self.mimetype)
            .field("duration", &self.duration)
            .finish()
    }
}

impl ConversionResult {
    #[must_use]
    pub fn into_media(self) -> MediaPayload {
        MediaPayload::new(self.mimetype, self.data)
    }
}

pub struct ConversionEngine {
    /// Encode static stickers losslessly.
    lossless: bool,
    /// Absent when no font could be loaded; text jobs then fail.
    text: Option<Arc<TextRenderer>>,
    transcoder: Transcoder,
}

impl ConversionEngine {
    #[must_use]
    pub fn new(lossless: bool, text: Option<TextRenderer>, transcoder: Transcoder) -> Self {
        Self {
            lossless,
            text: text.map(Arc::new),
            transcoder,
        }
    }

    #[must_use]
    pub fn transcoder(&self) -> &Transcoder {
        &self.transcoder
    }

    #[must_use]
    pub fn supports_text(&self) -> bool {
        self.text.is_some()
    }

    /// Produce sticker bytes for `source`.
    pub async fn convert(
        &self,
        source: &StickerSource,
        options: &ConversionOptions,
    ) -> Result<ConversionResult> {
        options.validate()?;
        let variant = source.variant();
        let started = Instant::now();

        let result = match source {
            StickerSource::StaticImage(media) => {
                self.convert_static(media.data.clone(), *options).await
            },
            StickerSource::Text(text) => self.convert_text(text.clone(), *options).await,
            StickerSource::AnimatedMedia(media) => {
                self.transcoder.transcode(&media.data, options).await
            },
        };
        let duration = started.elapsed();

        match result {
            Ok(data) => {
                info!(
                    operation = variant.as_str(),
                    duration_ms = duration.as_millis() as u64,
                    bytes = data.len(),
                    "conversion finished"
                );
                histogram!(stickers::OUTPUT_BYTES).record(data.len() as f64);
                Ok(ConversionResult {
                    data,
                    mimetype: STICKER_MIMETYPE,
                    duration,
                })
            },
            Err(e) => {
                warn!(
                    operation = variant.as_str(),
                    duration_ms = duration.as_millis() as u64,
                    error = %e,
                    "conversion failed"
                );
                Err(e)
            },
        }
    }

    async fn convert_static(&self, data: Vec<u8>, options: ConversionOptions) -> Result<Vec<u8>> {
        let lossless = self.lossless;
        run_blocking(move || {
            let img = image_ops::decode(&data)?;
            let square = image_ops::fit_square(&img, options.size);
            image_ops::encode_webp(&square, options.quality, lossless)
        })
        .await
    }

    async fn convert_text(&self, text: String, options: ConversionOptions) -> Result<Vec<u8>> {
        let renderer = self
            .text
            .clone()
            .ok_or_else(|| Error::Message("text stickers need a font; none loaded".into()))?;
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(Error::invalid_input("text is empty"));
        }
        let lossless = self.lossless;
        run_blocking(move || {
            let canvas = renderer.render(&text, options.size);
            image_ops::encode_webp(&canvas, options.quality, lossless)
        })
        .await
    }
}

/// Image work is CPU-bound; keep it off the async workers.
async fn run_blocking<F>(f: F) -> Result<Vec<u8>>
where
    F: FnOnce() -> Result<Vec<u8>> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::external("image task failed", e))?
}
