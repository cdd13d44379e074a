//! OpenAI-compatible LLM client.
//!
//! Works with OpenRouter and any other endpoint that speaks the chat
//! completions protocol. Messages can carry PDF files as base64 data URLs.

use super::parse::clean_response;
use crate::config::LlmConfig;
use crate::error::{BenchError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Message role in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// An attached file, sent inline as a data URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileData {
    pub filename: String,
    pub file_data: String,
}

impl FileData {
    /// Read a PDF from disk into a `data:application/pdf;base64,...` URL.
    pub fn from_pdf(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| BenchError::io(path, e))?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document.pdf")
            .to_string();

        Ok(Self {
            filename,
            file_data: format!("data:application/pdf;base64,{}", STANDARD.encode(bytes)),
        })
    }
}

/// One part of a multi-part message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    File { file: FileData },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn file(file: FileData) -> Self {
        ContentPart::File { file }
    }
}

/// Message body: plain text or a list of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(parts),
        }
    }

    fn has_files(&self) -> bool {
        match &self.content {
            MessageContent::Text(_) => false,
            MessageContent::Parts(parts) => parts
                .iter()
                .any(|p| matches!(p, ContentPart::File { .. })),
        }
    }
}

/// Request body for chat completion.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    plugins: Option<serde_json::Value>,
}

/// Response from chat completion.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Some providers send only part of the usage block.
#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

/// OpenAI API error response.
#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Response from an LLM call including metadata.
#[derive(Debug)]
pub struct LlmResponse {
    /// The generated content, untouched.
    pub content: String,
    /// Reason the model stopped generating.
    pub finish_reason: Option<String>,
    /// Token usage (if available).
    pub usage: Option<TokenUsage>,
}

#[derive(Debug)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// OpenAI-compatible LLM client bound to one model.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    config: LlmConfig,
}

impl fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmClient")
            .field("api_base", &self.config.api_base)
            .field("model", &self.config.model)
            .finish_non_exhaustive()
    }
}

impl LlmClient {
    /// Create a new LLM client with the given configuration.
    pub fn new(config: LlmConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    /// The model this client talks to.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Get the API endpoint URL.
    fn endpoint(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        format!("{}/v1/chat/completions", base)
    }

    /// Send a chat completion request, retrying transient failures.
    ///
    /// Waits `backoff_factor^attempt` seconds between attempts.
    pub async fn chat(&self, messages: &[Message]) -> Result<LlmResponse> {
        let max_attempts = self.config.max_retries.max(1);
        let mut attempt = 0;

        loop {
            match self.send(messages).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt + 1 < max_attempts => {
                    let wait = self.config.backoff_factor.powi(attempt as i32).max(0.0);
                    warn!(
                        model = %self.config.model,
                        attempt = attempt + 1,
                        "Request failed: {}. Retrying in {:.1} seconds...",
                        e,
                        wait
                    );
                    tokio::time::sleep(Duration::from_secs_f64(wait)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send(&self, messages: &[Message]) -> Result<LlmResponse> {
        let plugins = messages.iter().any(Message::has_files).then(|| {
            serde_json::json!([{ "id": "file-parser", "pdf": { "engine": "native" } }])
        });

        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            plugins,
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ApiError>(&body)
                .map(|api_error| api_error.error.message)
                .unwrap_or(body);

            // Rate limits and server errors are worth another attempt.
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                return Err(BenchError::Http(format!("{}: {}", status, detail)));
            }
            return Err(BenchError::LlmApi(format!("API error ({}): {}", status, detail)));
        }

        let completion: ChatCompletionResponse = serde_json::from_str(&body)?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| BenchError::LlmApi("No choices in response".to_string()))?;

        if let Some(usage) = &completion.usage {
            debug!(
                model = %self.config.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "chat completion"
            );
        }

        Ok(LlmResponse {
            content: choice.message.content.unwrap_or_default(),
            finish_reason: choice.finish_reason,
            usage: completion.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }

    /// Chat and return the cleaned reply text.
    ///
    /// Markdown fences, provider wrapper tokens and `<think>` blocks are
    /// removed.
    pub async fn ask(&self, messages: &[Message]) -> Result<String> {
        let response = self.chat(messages).await?;
        Ok(clean_response(&response.content))
    }

    /// Convenience method: single user message with optional system prompt.
    pub async fn complete(&self, system: Option<&str>, user: &str) -> Result<String> {
        let mut messages = Vec::new();

        if let Some(sys) = system {
            messages.push(Message::system(sys));
        }
        messages.push(Message::user(user));

        self.ask(&messages).await
    }

    /// Test connectivity to the API.
    pub async fn test_connection(&self) -> Result<()> {
        let reply = self
            .complete(None, "Say 'hello' and nothing else.")
            .await?;

        if reply.to_lowercase().contains("hello") {
            Ok(())
        } else {
            Err(BenchError::LlmApi(format!("Unexpected response: {}", reply)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(api_base: &str) -> LlmConfig {
        LlmConfig {
            api_base: api_base.to_string(),
            api_key: "test-key".to_string(),
            model: "test/model".to_string(),
            max_retries: 2,
            backoff_factor: 0.0,
            ..Default::default()
        }
    }

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{ "message": { "content": content }, "finish_reason": "stop" }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12 }
        })
    }

    #[test]
    fn test_message_creation() {
        let sys = Message::system("You are helpful.");
        let user = Message::user("Hello!");
        let assistant = Message::assistant("Hi there!");

        assert_eq!(sys.role, Role::System);
        assert_eq!(user.role, Role::User);
        assert_eq!(assistant.role, Role::Assistant);
        assert!(!user.has_files());
    }

    #[test]
    fn test_multipart_serialization() {
        let message = Message::user_parts(vec![
            ContentPart::text("Extract the questions."),
            ContentPart::file(FileData {
                filename: "exam.pdf".to_string(),
                file_data: "data:application/pdf;base64,AAAA".to_string(),
            }),
        ]);
        assert!(message.has_files());

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["type"], "file");
        assert_eq!(json["content"][1]["file"]["filename"], "exam.pdf");
    }

    #[test]
    fn test_file_data_from_pdf() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("Exam 2023.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();

        let file = FileData::from_pdf(&path).unwrap();
        assert_eq!(file.filename, "Exam 2023.pdf");
        assert_eq!(file.file_data, "data:application/pdf;base64,JVBERi0xLjQ=");
    }

    #[test]
    fn test_endpoint_construction() {
        let client = LlmClient::new(test_config("https://api.example.com/"));
        assert_eq!(client.endpoint(), "https://api.example.com/v1/chat/completions");

        let client2 = LlmClient::new(test_config("https://api.example.com"));
        assert_eq!(client2.endpoint(), "https://api.example.com/v1/chat/completions");
    }

    #[tokio::test]
    async fn test_ask_cleans_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({ "model": "test/model" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion("<think>hmm</think>```json\n{\"a\": 1}\n```")),
            )
            .mount(&server)
            .await;

        let client = LlmClient::new(test_config(&server.uri()));
        let reply = client.ask(&[Message::user("hi")]).await.unwrap();
        assert_eq!(reply, "{\"a\": 1}");
    }

    #[tokio::test]
    async fn test_file_parts_enable_pdf_plugin() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "plugins": [{ "id": "file-parser" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
            .expect(1)
            .mount(&server)
            .await;

        let client = LlmClient::new(test_config(&server.uri()));
        let message = Message::user_parts(vec![ContentPart::file(FileData {
            filename: "a.pdf".to_string(),
            file_data: "data:application/pdf;base64,AA==".to_string(),
        })]);
        assert_eq!(client.ask(&[message]).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("second try")))
            .mount(&server)
            .await;

        let client = LlmClient::new(test_config(&server.uri()));
        let reply = client.ask(&[Message::user("hi")]).await.unwrap();
        assert_eq!(reply, "second try");
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": { "message": "bad key", "type": "auth" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = LlmClient::new(test_config(&server.uri()));
        let err = client.ask(&[Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, BenchError::LlmApi(_)));
        assert!(err.to_string().contains("bad key"));
    }

    #[tokio::test]
    async fn test_null_content_reads_as_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "content": null } }]
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new(test_config(&server.uri()));
        let response = client.chat(&[Message::user("hi")]).await.unwrap();
        assert!(response.content.is_empty());
        assert!(response.usage.is_none());
    }

    #[tokio::test]
    async fn test_partial_usage_is_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "content": "ok" } }],
                "usage": { "prompt_tokens": 7 }
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new(test_config(&server.uri()));
        let response = client.chat(&[Message::user("hi")]).await.unwrap();
        let usage = response.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 7);
        assert_eq!(usage.total_tokens, 0);
    }

    #[test]
    fn test_debug_hides_api_key() {
        let client = LlmClient::new(test_config("http://localhost"));
        let debug = format!("{:?}", client);
        assert!(debug.contains("test/model"));
        assert!(!debug.contains("test-key"));
    }
}
