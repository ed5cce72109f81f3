pub mod api;
pub mod config;
pub mod conversation;
pub mod error;
pub mod pins;
pub mod pipeline;
pub mod presence;
pub mod reducer;
pub mod session;
pub mod store;
pub mod tracker;

pub use api::{ChatApi, Draft, PushSink, UploadFile};
pub use config::{FailurePolicy, SyncConfig};
pub use conversation::{Applied, Conversation, SendOutcome, Snapshot};
pub use error::{ApiError, SyncError};
pub use session::{Session, SessionHandle, SessionNotice};
