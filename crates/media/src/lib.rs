//! Sticker conversion: static images, rendered text and animated media,
//! all encoded as WebP.

pub mod animated;
pub mod engine;
pub mod error;
pub mod image_ops;
pub mod options;
pub mod text;

pub use {
    animated::{Transcoder, TranscoderSettings},
    engine::{ConversionEngine, ConversionResult, StickerSource, Variant},
    error::{Error, Result},
    image_ops::STICKER_MIMETYPE,
    options::{ConversionOptions, ConversionOverrides},
    text::TextRenderer,
};
