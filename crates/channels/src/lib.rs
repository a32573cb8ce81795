//! Chat transport abstraction.
//!
//! A transport (WhatsApp Web, or an in-memory fake in tests) implements
//! [`ChatTransport`] for outbound operations and feeds [`TransportEvent`]s
//! into the bot through an mpsc channel.

pub mod error;
pub mod plugin;

pub use {
    error::{Error, Result},
    plugin::{ChatTransport, EventReceiver, EventSender, TransportEvent, TransportStatus},
};
