//! Data models: canonical messages and wire payloads

pub mod event;
pub mod message;

pub use event::{PushEvent, WireJoin, WireMessage, WireTyping};
pub use message::{
    Attachment, AttachmentKind, DeliveryStatus, Direction, Fingerprint, Message,
};
