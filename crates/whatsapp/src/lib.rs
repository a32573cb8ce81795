//! WhatsApp Web transport for stickerbot.
//!
//! Implements `ChatTransport` on top of a whatsapp-web.js sidecar (a Node.js
//! child process) that speaks newline-delimited JSON over stdio. The sidecar
//! owns the browser session and QR pairing; this crate only correlates
//! requests with responses and forwards events.

pub mod process;
pub mod protocol;
pub mod transport;

pub use {
    process::{SidecarConfig, SidecarProcess, find_sidecar_dir, start_sidecar},
    transport::WhatsAppTransport,
};
