pub mod api;
pub mod events;
pub mod models;

pub use events::{ChatEvent, ClientCommand};
pub use models::{Attachment, LocalId, Message, MessageKey, MessageStatus, Reaction, ReplyPreview};
