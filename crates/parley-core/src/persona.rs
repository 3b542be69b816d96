use serde::{Deserialize, Serialize};

/// The identity the bot presents to every user.
///
/// All fields are interpolated verbatim into the persona prompt and greeting;
/// nothing is escaped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Persona {
    pub bot_name: String,
    pub model_identity: String,
    pub company_name: String,
}

impl Persona {
    pub fn new(
        bot_name: impl Into<String>,
        model_identity: impl Into<String>,
        company_name: impl Into<String>,
    ) -> Self {
        Self {
            bot_name: bot_name.into(),
            model_identity: model_identity.into(),
            company_name: company_name.into(),
        }
    }

    /// The system prompt seeded as the first (user) turn of every session.
    pub fn system_prompt(&self) -> String {
        format!(
            "You are a very helpful AI assistant. Your name is {}. You use the {} model. \
             You were created and developed by {}. Answer every question in a friendly and \
             informative tone. Where possible, format answers so they are easy to read \
             (for example with bullet points or short paragraphs). Do not end the \
             conversation with a question unless you need clarification.",
            self.bot_name, self.model_identity, self.company_name
        )
    }

    /// The greeting seeded as the second (model) turn of every session.
    pub fn greeting(&self) -> String {
        format!(
            "Hello! I'm {}, your AI assistant. How can I help you today?",
            self.bot_name
        )
    }
}
