pub mod conversation;
pub mod error;
pub mod paths;
pub mod types;

pub use conversation::{recent_dialogue, ConversationLog, JsonlConversation, MemoryConversation};
pub use error::BacktrackError;
pub use paths::{RetracePaths, FAILED_ATTEMPTS_DIR};
pub use types::*;
