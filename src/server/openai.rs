//! OpenAI API client for post-call lead extraction and follow-up copy
//!
//! Lead extraction runs a stored prompt (by id) through the Responses API
//! with the transcript as input. Models do not always honour "JSON only",
//! so the output is searched for the JSON object it contains.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::LeadExtraction;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    prompt: PromptRef<'a>,
    input: &'a str,
}

#[derive(Debug, Serialize)]
struct PromptRef<'a> {
    id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    item_type: String,
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorBody {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    async fn post<T: Serialize, R: for<'de> Deserialize<'de>>(&self, path: &str, body: &T) -> Result<R, OpenAiError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| OpenAiError::NetworkError(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OpenAiError::NetworkError(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<OpenAiErrorBody>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(OpenAiError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| OpenAiError::ParseError(e.to_string()))
    }

    /// Score a call transcript with the stored extraction prompt.
    pub async fn extract_lead_data(&self, prompt_id: &str, transcript: &str) -> Result<LeadExtraction, OpenAiError> {
        let request = ResponsesRequest {
            prompt: PromptRef { id: prompt_id },
            input: transcript,
        };
        let response: ResponsesResponse = self.post("/responses", &request).await?;

        let text = response
            .output
            .iter()
            .filter(|item| item.item_type == "message")
            .flat_map(|item| item.content.iter())
            .filter(|c| c.content_type == "output_text")
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        parse_extraction(&text)
    }

    /// Single-turn chat completion.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String, OpenAiError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
            temperature: 0.7,
        };
        let response: ChatResponse = self.post("/chat/completions", &request).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| OpenAiError::ParseError("empty completion".to_string()))
    }
}

/// Pull the extraction object out of model output, which may be bare JSON,
/// fenced in a markdown code block, surrounded by prose, or a one-element
/// array.
pub fn parse_extraction(text: &str) -> Result<LeadExtraction, OpenAiError> {
    let value = find_json(text).ok_or_else(|| OpenAiError::ParseError("no JSON object in model output".to_string()))?;
    let object = match value {
        Value::Array(items) => items
            .into_iter()
            .find(Value::is_object)
            .ok_or_else(|| OpenAiError::ParseError("empty array in model output".to_string()))?,
        other => other,
    };
    serde_json::from_value(object).map_err(|e| OpenAiError::ParseError(e.to_string()))
}

fn find_json(text: &str) -> Option<Value> {
    let trimmed = strip_fence(text.trim());
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() || value.is_array() {
            return Some(value);
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Errors that can occur when calling the OpenAI API
#[derive(Debug, thiserror::Error)]
#[allow(clippy::enum_variant_names)]
pub enum OpenAiError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Parse error: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_json() {
        let extraction = parse_extraction(r#"{"total_score": "82", "lead_status_tag": "Hot"}"#).unwrap();
        assert_eq!(extraction.total_score, Some(82));
        assert_eq!(extraction.lead_status_tag.as_deref(), Some("Hot"));
    }

    #[test]
    fn test_parse_fenced_json_with_prose() {
        let text = "```json\n{\"intent_level\": \"High\", \"extraction\": {\"email\": \"ana@example.com\"}, \"cta_demo_clicked\": \"Yes\"}\n```";
        let extraction = parse_extraction(text).unwrap();
        assert_eq!(extraction.intent_level.as_deref(), Some("High"));
        assert_eq!(extraction.email(), Some("ana@example.com"));
        assert!(extraction.cta_demo_clicked);

        let chatty = "Here is the analysis:\n{\"total_score\": 40}\nLet me know if you need more.";
        assert_eq!(parse_extraction(chatty).unwrap().total_score, Some(40));
    }

    #[test]
    fn test_parse_single_element_array() {
        let extraction = parse_extraction(r#"[{"urgency_score": 2}]"#).unwrap();
        assert_eq!(extraction.urgency_score, Some(2));
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(matches!(parse_extraction("I could not analyse this call."), Err(OpenAiError::ParseError(_))));
        assert!(matches!(parse_extraction("[]"), Err(OpenAiError::ParseError(_))));
    }
}
