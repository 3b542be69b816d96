pub mod session;
pub mod store;

pub use session::ConversationSession;
pub use store::{InMemorySessionStore, SessionStore};
