use super::{ChatBackend, ChatResponse, SafetyRating};
use crate::config::ModelConfig;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use parley_core::{ContentPart, ParleyError, ParleyResult, Turn};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Google Gemini `generateContent` backend.
pub struct GeminiBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl GeminiBackend {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url(),
            self.config.model_id
        )
    }
}

#[async_trait]
impl ChatBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn chat_turn(
        &self,
        history: &[Turn],
        prompt: &[ContentPart],
    ) -> ParleyResult<ChatResponse> {
        let body = build_request(&self.config, history, prompt);

        let resp = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ParleyError::Http(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ParleyError::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(ParleyError::Backend(format!(
                "Gemini API error {status}: {}",
                error_message(&text)
            )));
        }

        debug!(model = %self.config.model_id, bytes = text.len(), "Gemini response received");
        parse_gemini_response(&text)
    }
}

// -- Gemini wire types --

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    safety_settings: &'static [SafetySetting],
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    role: &'static str,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum GeminiPart<'a> {
    Text {
        text: &'a str,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData<'a>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

/// Fixed thresholds: every harm category blocks at medium probability and up.
static SAFETY_SETTINGS: [SafetySetting; 4] = [
    SafetySetting {
        category: "HARM_CATEGORY_HARASSMENT",
        threshold: "BLOCK_MEDIUM_AND_ABOVE",
    },
    SafetySetting {
        category: "HARM_CATEGORY_HATE_SPEECH",
        threshold: "BLOCK_MEDIUM_AND_ABOVE",
    },
    SafetySetting {
        category: "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        threshold: "BLOCK_MEDIUM_AND_ABOVE",
    },
    SafetySetting {
        category: "HARM_CATEGORY_DANGEROUS_CONTENT",
        threshold: "BLOCK_MEDIUM_AND_ABOVE",
    },
];

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
    #[serde(default)]
    safety_ratings: Vec<SafetyRating>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
    #[serde(default)]
    safety_ratings: Vec<SafetyRating>,
}

#[derive(Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
}

fn to_gemini_part(part: &ContentPart) -> GeminiPart<'_> {
    match part {
        ContentPart::Text(text) => GeminiPart::Text { text },
        ContentPart::Image { data, mime_type } => GeminiPart::InlineData {
            inline_data: InlineData {
                mime_type,
                data: BASE64_STANDARD.encode(data),
            },
        },
    }
}

fn build_request<'a>(
    config: &ModelConfig,
    history: &'a [Turn],
    prompt: &'a [ContentPart],
) -> GenerateContentRequest<'a> {
    let mut contents: Vec<GeminiContent<'a>> = history
        .iter()
        .map(|turn| GeminiContent {
            role: turn.role.as_str(),
            parts: turn.parts.iter().map(to_gemini_part).collect(),
        })
        .collect();
    contents.push(GeminiContent {
        role: "user",
        parts: prompt.iter().map(to_gemini_part).collect(),
    });

    let generation_config = (config.temperature.is_some() || config.max_output_tokens.is_some())
        .then(|| GenerationConfig {
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        });

    GenerateContentRequest {
        contents,
        safety_settings: &SAFETY_SETTINGS,
        generation_config,
    }
}

/// Finish reasons that mean the candidate was withheld rather than empty.
fn is_block_finish(reason: &str) -> bool {
    matches!(
        reason,
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII"
    )
}

/// Interprets a successful `generateContent` body.
pub fn parse_gemini_response(body: &str) -> ParleyResult<ChatResponse> {
    if body.trim().is_empty() {
        return Ok(ChatResponse::Missing);
    }
    let parsed: Option<GenerateContentResponse> = serde_json::from_str(body)
        .map_err(|e| ParleyError::Backend(format!("Failed to parse Gemini response: {e}")))?;
    let Some(parsed) = parsed else {
        return Ok(ChatResponse::Missing);
    };
    if parsed.candidates.is_none() && parsed.prompt_feedback.is_none() {
        return Ok(ChatResponse::Missing);
    }

    let candidate = parsed.candidates.and_then(|c| c.into_iter().next());
    let text: String = candidate
        .as_ref()
        .and_then(|c| c.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect()
        })
        .unwrap_or_default();

    if !text.is_empty() {
        return Ok(ChatResponse::Text(text));
    }

    let feedback = parsed.prompt_feedback;
    let reason = feedback
        .as_ref()
        .and_then(|f| f.block_reason.clone())
        .or_else(|| {
            candidate
                .as_ref()
                .and_then(|c| c.finish_reason.clone())
                .filter(|r| is_block_finish(r))
        });

    let safety_ratings = match (feedback, candidate) {
        (Some(f), _) if !f.safety_ratings.is_empty() => f.safety_ratings,
        (_, Some(c)) => c.safety_ratings,
        _ => Vec::new(),
    };

    Ok(ChatResponse::Blocked {
        reason,
        safety_ratings,
    })
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorWrapper>(body)
        .ok()
        .and_then(|w| {
            let message = w.error.message?;
            Some(match w.error.status {
                Some(status) if !status.is_empty() => format!("{status}: {message}"),
                _ => message,
            })
        })
        .unwrap_or_else(|| body.to_string())
}
