//! Shared error taxonomy and message types.

pub mod error;
pub mod types;

pub use {
    error::{BusinessKind, Error, ErrorCode, FromMessage, Result, TransportKind},
    types::{InboundMessage, MediaPayload, MessageType, StickerMetadata},
};
