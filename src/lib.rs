//! hearth-chat - support-chat synchronization engine
//!
//! Keeps one consistent, ordered, duplicate-free conversation timeline
//! while data arrives from three independent sources: a paginated history
//! fetch, a persistent push connection, and the user's own outgoing
//! sends — under unreliable network conditions.
//!
//! Open a session per conversation with [`ChatSession::open`], drive it
//! through the returned [`ChatHandle`], and render from the notification
//! stream plus [`ChatHandle::snapshot`].

pub mod api;
pub mod config;
pub mod connection;
pub mod error;
pub mod identity;
pub mod models;
pub mod outbound;
pub mod session;
pub mod timeline;
pub mod typing;
pub mod viewport;

pub use config::ChatConfig;
pub use connection::ConnectionState;
pub use error::ChatError;
pub use identity::{Identity, Profile};
pub use models::{Attachment, AttachmentKind, DeliveryStatus, Direction, Message};
pub use session::{ChatHandle, ChatSession, Notification, SessionParams};
pub use viewport::ScrollAction;
