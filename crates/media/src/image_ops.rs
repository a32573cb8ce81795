//! Image operations for sticker output.
//!
//! Decodes source images, fits them into a transparent square canvas and
//! encodes the result as WebP.

use std::io::Cursor;

use image::{
    DynamicImage, ExtendedColorType, GenericImageView, ImageFormat, ImageReader, Rgba, RgbaImage,
    codecs::webp::WebPEncoder, imageops::FilterType,
};

use crate::error::{Context, Error, Result};

/// Output mimetype of every sticker.
pub const STICKER_MIMETYPE: &str = "image/webp";

/// Padding colour around non-square images.
const TRANSPARENT: Rgba<u8> = Rgba([255, 255, 255, 0]);

/// Image metadata.
#[derive(Debug, Clone)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub format: Option<ImageFormat>,
}

/// Get metadata about an image without fully decoding it.
pub fn get_image_metadata(data: &[u8]) -> Result<ImageMetadata> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .context("failed to guess image format")?;

    let format = reader.format();
    let (width, height) = reader
        .into_dimensions()
        .context("failed to read image dimensions")?;

    Ok(ImageMetadata {
        width,
        height,
        format,
    })
}

/// Decode an image, sniffing the format from its bytes.
pub fn decode(data: &[u8]) -> Result<DynamicImage> {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .context("failed to guess image format")?
        .decode()
        .context("failed to decode image")
}

/// Scale `img` to fit inside `size × size`, preserving aspect ratio, and
/// center it on a transparent square canvas.
#[must_use]
pub fn fit_square(img: &DynamicImage, size: u32) -> RgbaImage {
    let (width, height) = img.dimensions();
    let resized = if width == size && height == size {
        img.to_rgba8()
    } else {
        img.resize(size, size, FilterType::Lanczos3).to_rgba8()
    };

    if resized.width() == size && resized.height() == size {
        return resized;
    }

    let mut canvas = RgbaImage::from_pixel(size, size, TRANSPARENT);
    let x = (size - resized.width()) / 2;
    let y = (size - resized.height()) / 2;
    image::imageops::overlay(&mut canvas, &resized, i64::from(x), i64::from(y));
    canvas
}

/// Encode RGBA pixels as WebP, lossy at `quality` unless `lossless`.
pub fn encode_webp(img: &RgbaImage, quality: u8, lossless: bool) -> Result<Vec<u8>> {
    let (width, height) = img.dimensions();

    if lossless {
        let mut output = Cursor::new(Vec::new());
        WebPEncoder::new_lossless(&mut output)
            .encode(img.as_raw(), width, height, ExtendedColorType::Rgba8)
            .context("failed to encode lossless webp")?;
        return Ok(output.into_inner());
    }

    let encoded = webp::Encoder::from_rgba(img.as_raw(), width, height)
        .encode_simple(false, f32::from(quality))
        .map_err(|e| Error::Message(format!("failed to encode webp: {e:?}")))?;
    Ok(encoded.to_vec())
}

/// Guess the mimetype of image bytes from their magic number.
#[must_use]
pub fn sniff_mimetype(data: &[u8]) -> Option<&'static str> {
    let format = image::guess_format(data).ok()?;
    format_to_media_type(format)
}

fn format_to_media_type(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::Png => Some("image/png"),
        ImageFormat::WebP => Some("image/webp"),
        ImageFormat::Gif => Some("image/gif"),
        _ => None,
    }
}
