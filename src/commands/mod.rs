pub mod dispatcher;
pub mod handler;
pub mod registry;

use crate::providers::InlineData;
use crate::session::ChatSession;
pub use dispatcher::{CommandDispatcher, create_command_registry};

pub struct ChatState {
    pub session: ChatSession,
    /// Image attached with `/image`, sent with the next message.
    pub pending_image: Option<InlineData>,
    pub should_continue: bool,
}

impl ChatState {
    pub fn new(session: ChatSession) -> Self {
        Self {
            session,
            pending_image: None,
            should_continue: true,
        }
    }
}
