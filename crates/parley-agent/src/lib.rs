pub mod backends;
pub mod config;

pub use backends::gemini::GeminiBackend;
pub use backends::{ChatBackend, ChatResponse, SafetyRating};
pub use config::ModelConfig;
