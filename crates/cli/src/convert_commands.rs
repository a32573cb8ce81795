use std::path::{Path, PathBuf};

use {
    anyhow::{Context, Result, bail},
    clap::Args,
    stickerbot_common::MediaPayload,
    stickerbot_config::StickerbotConfig,
    stickerbot_media::{ConversionOptions, ConversionOverrides, StickerSource, image_ops},
    tracing::info,
};

use crate::bot::{build_engine, default_options};

#[derive(Args)]
pub struct ConvertArgs {
    /// Image, GIF or video to convert.
    #[arg(long, short, conflicts_with = "text", required_unless_present = "text")]
    input: Option<PathBuf>,

    /// Render this text instead of converting a file.
    #[arg(long)]
    text: Option<String>,

    /// Where to write the WebP sticker.
    #[arg(long, short)]
    output: PathBuf,

    /// Canvas edge in pixels (128-512). Defaults to `sticker.size`.
    #[arg(long)]
    size: Option<u32>,

    /// Encoder quality (1-100). Defaults to `sticker.quality`.
    #[arg(long)]
    quality: Option<u8>,

    /// Declared mimetype of the input; guessed from content or extension when unset.
    #[arg(long)]
    mimetype: Option<String>,
}

/// Mimetype for `data` read from `path`: magic bytes first, then extension.
fn guess_mimetype(path: &Path, data: &[u8]) -> Option<String> {
    if let Some(mimetype) = image_ops::sniff_mimetype(data) {
        return Some(mimetype.to_string());
    }
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mimetype = match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "3gp" => "video/3gpp",
        "gif" => "image/gif",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => return None,
    };
    Some(mimetype.to_string())
}

pub async fn handle_convert(args: ConvertArgs, config: &StickerbotConfig) -> Result<()> {
    let options = ConversionOptions::resolve(
        ConversionOverrides {
            quality: args.quality,
            size: args.size,
        },
        default_options(config),
    )?;

    let source = match (args.text, args.input) {
        (Some(text), _) => {
            if text.trim().is_empty() {
                bail!("--text must not be empty");
            }
            StickerSource::Text(text)
        },
        (None, Some(input)) => {
            let data = tokio::fs::read(&input)
                .await
                .with_context(|| format!("failed to read {}", input.display()))?;
            let mimetype = args
                .mimetype
                .or_else(|| guess_mimetype(&input, &data))
                .with_context(|| {
                    format!(
                        "cannot tell the media type of {}; pass --mimetype",
                        input.display()
                    )
                })?;
            let mut media = MediaPayload::new(mimetype, data);
            media.filename = input
                .file_name()
                .map(|name| name.to_string_lossy().into_owned());
            StickerSource::from_media(media)?
        },
        (None, None) => bail!("either --input or --text is required"),
    };

    let engine = build_engine(config);
    let variant = source.variant();
    let result = engine.convert(&source, &options).await?;

    tokio::fs::write(&args.output, &result.data)
        .await
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    info!(
        variant = variant.as_str(),
        size = options.size,
        quality = options.quality,
        bytes = result.data.len(),
        duration_ms = result.duration.as_millis() as u64,
        output = %args.output.display(),
        "sticker written"
    );
    eprintln!(
        "Wrote {} ({} bytes, {}, {} ms)",
        args.output.display(),
        result.data.len(),
        variant,
        result.duration.as_millis()
    );
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_fallback_for_video() {
        let guessed = guess_mimetype(Path::new("clip.MP4"), b"\0\0\0\x18ftypmp42");
        assert_eq!(guessed.as_deref(), Some("video/mp4"));
        assert!(guess_mimetype(Path::new("notes.txt"), b"hello").is_none());
    }

    #[test]
    fn magic_bytes_beat_the_extension() {
        let gif = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";
        let guessed = guess_mimetype(Path::new("actually-a-gif.png"), gif);
        assert_eq!(guessed.as_deref(), Some("image/gif"));
    }
}
