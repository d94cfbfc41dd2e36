use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::{future, Stream, StreamExt};
use gemini_client_api::gemini::{ask::Gemini, types::sessions::Session};
use reqwest::ClientBuilder;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::StudioConfig;
use crate::error::StudioError;
use crate::models::{ChatMessage, GenerationResult, ImageAttachment, Role};
use crate::project::{build_context, ProjectFiles, Workspace};
use crate::prompts::PromptsConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Gemini,
    Ollama,
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmProvider::Gemini => f.write_str("gemini"),
            LlmProvider::Ollama => f.write_str("ollama"),
        }
    }
}

const GEMINI_FLASH_MODEL: &str = "gemini-3-flash-preview";
const GEMINI_PRO_MODEL: &str = "gemini-3-pro-preview";

/// Model names that point at a local Ollama install.
pub fn is_local_model(model: &str) -> bool {
    let name = model.to_lowercase();
    ["local", "llama", "qwen", "coder"].iter().any(|hint| name.contains(hint))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub model: String,
}

impl ModelConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into() }
    }

    pub fn provider(&self) -> LlmProvider {
        if is_local_model(&self.model) {
            LlmProvider::Ollama
        } else {
            LlmProvider::Gemini
        }
    }

    /// Gemini only serves two tiers; anything mentioning `pro` gets the bigger one.
    pub fn gemini_model(&self) -> &'static str {
        if self.model.to_lowercase().contains("pro") {
            GEMINI_PRO_MODEL
        } else {
            GEMINI_FLASH_MODEL
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::new(crate::models::DEFAULT_MODEL)
    }
}

/// Everything one exchange sends to the model.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub files: ProjectFiles,
    pub history: Vec<ChatMessage>,
    pub image: Option<ImageAttachment>,
    /// `None` sends every file, used by repairs.
    pub scope: Option<Workspace>,
    pub model: ModelConfig,
}

impl GenerationRequest {
    pub fn context_text(&self) -> String {
        build_context(&self.prompt, &self.files, self.scope)
    }
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<String>> + Send>>;

/// A chat-completion service that answers with the studio's JSON envelope.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Starts a streamed reply. Dropping the stream aborts the request.
    async fn stream(&self, request: &GenerationRequest) -> anyhow::Result<ChunkStream>;

    /// One-shot reply, parsed.
    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<GenerationResult>;
}

#[derive(Serialize)]
struct OllamaChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaChatMessage>,
    stream: bool,
    format: String,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaResponseMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct GeminiStreamChunk {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    error: Option<GeminiApiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct GeminiApiError {
    #[serde(default)]
    message: String,
}

/// Splits a byte stream into lines. Bytes are buffered up to each newline so
/// multi-byte characters split across network reads stay intact.
fn lines<S, B, E>(bytes: S) -> impl Stream<Item = anyhow::Result<String>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    futures::stream::unfold((bytes, Vec::<u8>::new(), false), |(mut bytes, mut buf, mut done)| async move {
        loop {
            if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line)
                    .trim_end_matches(|c| c == '\r' || c == '\n')
                    .to_string();
                return Some((Ok(text), (bytes, buf, done)));
            }
            if done {
                if buf.is_empty() {
                    return None;
                }
                let text = String::from_utf8_lossy(&buf).to_string();
                buf.clear();
                return Some((Ok(text), (bytes, buf, done)));
            }
            match bytes.next().await {
                Some(Ok(chunk)) => buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => return Some((Err(anyhow::Error::new(e)), (bytes, Vec::new(), true))),
                None => done = true,
            }
        }
    })
}

/// Text carried by one `data:` line of Gemini's SSE stream.
fn parse_gemini_line(line: &str) -> anyhow::Result<Option<String>> {
    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let payload = payload.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return Ok(None);
    }

    let chunk: GeminiStreamChunk =
        serde_json::from_str(payload).context("Failed to parse Gemini stream event")?;
    if let Some(error) = chunk.error {
        return Err(StudioError::provider("Gemini", error.message).into());
    }

    let text: String = chunk
        .candidates
        .iter()
        .filter_map(|c| c.content.as_ref())
        .flat_map(|c| c.parts.iter())
        .filter_map(|p| p.text.as_deref())
        .collect();

    Ok((!text.is_empty()).then_some(text))
}

/// Content carried by one NDJSON line of Ollama's chat stream.
fn parse_ollama_line(line: &str) -> anyhow::Result<Option<String>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let chunk: OllamaChatResponse = match serde_json::from_str(line) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!("Skipping unparseable Ollama line: {}", e);
            return Ok(None);
        }
    };
    if let Some(error) = chunk.error {
        return Err(StudioError::provider("Ollama", error).into());
    }
    Ok(chunk.message.map(|m| m.content).filter(|c| !c.is_empty()))
}

fn parse_envelope(text: &str) -> anyhow::Result<GenerationResult> {
    let text = text.trim();
    if text.is_empty() {
        anyhow::bail!("AI returned empty response");
    }
    Ok(serde_json::from_str(text).map_err(StudioError::MalformedResponse)?)
}

fn map_send_error(provider: &'static str, e: reqwest::Error) -> anyhow::Error {
    if e.is_connect() {
        StudioError::provider(provider, "connection failed. Please check that the service is reachable").into()
    } else if e.is_timeout() {
        StudioError::provider(provider, "request timed out. The model might be too large or the server is under heavy load").into()
    } else {
        StudioError::provider(provider, e.to_string()).into()
    }
}

async fn check_status(provider: &'static str, response: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
    let message = match status.as_u16() {
        400 => format!("Bad request. Status {}: {}", status, error_text),
        401 | 403 => format!("Authentication failed. Status {}: {}", status, error_text),
        404 => format!("Model not found. Status {}: {}", status, error_text),
        429 => format!("Rate limited. Status {}: {}", status, error_text),
        _ => format!("Request failed with status {}: {}", status, error_text),
    };
    Err(StudioError::provider(provider, message).into())
}

/// Talks to Gemini over HTTPS and to Ollama on the local machine.
pub struct HttpChatBackend {
    client: reqwest::Client,
    gemini_api_key: Option<String>,
    gemini_base_url: String,
    ollama_base_url: String,
    temperature: f32,
    prompts: PromptsConfig,
}

impl HttpChatBackend {
    pub fn from_config(config: &StudioConfig, prompts: PromptsConfig) -> anyhow::Result<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.llm.timeout_seconds))
            .connect_timeout(Duration::from_secs(config.llm.connect_timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            gemini_api_key: config.llm.gemini.api_key.clone(),
            gemini_base_url: config.llm.gemini.base_url.trim_end_matches('/').to_string(),
            ollama_base_url: config.llm.ollama.base_url.trim_end_matches('/').to_string(),
            temperature: config.llm.gemini.temperature,
            prompts,
        })
    }

    fn gemini_key(&self) -> anyhow::Result<&str> {
        self.gemini_api_key
            .as_deref()
            .filter(|k| !k.is_empty() && *k != "undefined")
            .ok_or_else(|| StudioError::MissingApiKey("GEMINI_API_KEY").into())
    }

    fn gemini_body(&self, request: &GenerationRequest) -> Value {
        let mut contents: Vec<Value> = request
            .history
            .iter()
            .filter(|m| !m.content.trim().is_empty())
            .map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                };
                json!({ "role": role, "parts": [{ "text": m.content }] })
            })
            .collect();

        let mut parts = vec![json!({ "text": request.context_text() })];
        if let Some(image) = &request.image {
            parts.push(json!({ "inlineData": { "mimeType": image.mime_type, "data": image.data } }));
        }
        contents.push(json!({ "role": "user", "parts": parts }));

        json!({
            "systemInstruction": { "parts": [{ "text": self.prompts.get_system_instructions() }] },
            "contents": contents,
            "generationConfig": {
                "responseMimeType": "application/json",
                "temperature": self.temperature
            }
        })
    }

    fn ollama_request(&self, request: &GenerationRequest, stream: bool) -> OllamaChatRequest {
        let mut messages = vec![OllamaChatMessage {
            role: "system".to_string(),
            content: self.prompts.get_system_instructions().to_string(),
        }];
        messages.extend(request.history.iter().map(|m| OllamaChatMessage {
            role: m.role.as_str().to_string(),
            content: m.content.clone(),
        }));
        messages.push(OllamaChatMessage {
            role: "user".to_string(),
            content: request.context_text(),
        });

        OllamaChatRequest {
            model: request.model.model.clone(),
            messages,
            stream,
            format: "json".to_string(),
        }
    }

    async fn stream_gemini(&self, request: &GenerationRequest) -> anyhow::Result<ChunkStream> {
        let key = self.gemini_key()?;
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.gemini_base_url,
            request.model.gemini_model()
        );
        info!("Streaming from Gemini model {}", request.model.gemini_model());

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", key)
            .json(&self.gemini_body(request))
            .send()
            .await
            .map_err(|e| map_send_error("Gemini", e))?;
        let response = check_status("Gemini", response).await?;

        let chunks = lines(Box::pin(response.bytes_stream())).filter_map(|line| {
            future::ready(match line {
                Ok(line) => parse_gemini_line(&line).transpose(),
                Err(e) => Some(Err(e)),
            })
        });
        Ok(Box::pin(chunks))
    }

    async fn stream_ollama(&self, request: &GenerationRequest) -> anyhow::Result<ChunkStream> {
        let url = format!("{}/api/chat", self.ollama_base_url);
        info!("Streaming from Ollama model {}", request.model.model);

        let response = self
            .client
            .post(&url)
            .json(&self.ollama_request(request, true))
            .send()
            .await
            .map_err(|e| map_send_error("Ollama", e))?;
        let response = check_status("Ollama", response).await?;

        let chunks = lines(Box::pin(response.bytes_stream())).filter_map(|line| {
            future::ready(match line {
                Ok(line) => parse_ollama_line(&line).transpose(),
                Err(e) => Some(Err(e)),
            })
        });
        Ok(Box::pin(chunks))
    }

    async fn generate_gemini(&self, request: &GenerationRequest) -> anyhow::Result<GenerationResult> {
        let key = self.gemini_key()?;
        let ai = Gemini::new(key.to_string(), request.model.gemini_model(), None);
        let mut session = Session::new(10);

        let full_prompt = format!(
            "{}\n\nRespond with JSON only.\n\n{}",
            self.prompts.get_system_instructions(),
            request.context_text()
        );

        let response = ai
            .ask(session.ask_string(&full_prompt))
            .await
            .map_err(|e| StudioError::provider("Gemini", e.to_string()))?;

        parse_envelope(&response.get_text(""))
    }

    async fn generate_ollama(&self, request: &GenerationRequest) -> anyhow::Result<GenerationResult> {
        let url = format!("{}/api/chat", self.ollama_base_url);
        let response = self
            .client
            .post(&url)
            .json(&self.ollama_request(request, false))
            .send()
            .await
            .map_err(|e| map_send_error("Ollama", e))?;
        let response = check_status("Ollama", response).await?;

        let body = response
            .json::<OllamaChatResponse>()
            .await
            .context("Failed to parse JSON response from Ollama API")?;
        if let Some(error) = body.error {
            return Err(StudioError::provider("Ollama", error).into());
        }
        let content = body.message.map(|m| m.content).unwrap_or_default();
        parse_envelope(&content)
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn stream(&self, request: &GenerationRequest) -> anyhow::Result<ChunkStream> {
        match request.model.provider() {
            LlmProvider::Gemini => self.stream_gemini(request).await,
            LlmProvider::Ollama => self.stream_ollama(request).await,
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<GenerationResult> {
        match request.model.provider() {
            LlmProvider::Gemini => self.generate_gemini(request).await,
            LlmProvider::Ollama => self.generate_ollama(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn request(model: &str) -> GenerationRequest {
        GenerationRequest {
            prompt: "Build a todo app".to_string(),
            files: ProjectFiles::from([("app/index.html", "<div></div>")]),
            history: vec![ChatMessage::user("hello"), ChatMessage::assistant("")],
            image: Some(ImageAttachment {
                data: "aGk=".to_string(),
                mime_type: "image/png".to_string(),
            }),
            scope: Some(Workspace::App),
            model: ModelConfig::new(model),
        }
    }

    fn backend() -> HttpChatBackend {
        HttpChatBackend::from_config(&StudioConfig::default(), PromptsConfig::default()).unwrap()
    }

    #[test]
    fn test_model_routing() {
        assert_eq!(ModelConfig::new("qwen2.5-coder:7b").provider(), LlmProvider::Ollama);
        assert_eq!(ModelConfig::new("Llama3").provider(), LlmProvider::Ollama);
        assert_eq!(ModelConfig::new("gemini-3-flash-preview").provider(), LlmProvider::Gemini);
        assert_eq!(ModelConfig::new("gemini-pro").gemini_model(), GEMINI_PRO_MODEL);
        assert_eq!(ModelConfig::new("anything").gemini_model(), GEMINI_FLASH_MODEL);
    }

    #[test]
    fn test_gemini_line_parsing() {
        let line = r#"data: {"candidates":[{"content":{"parts":[{"text":"{\"thou"},{"text":"ght\""}]}}]}"#;
        assert_eq!(parse_gemini_line(line).unwrap().as_deref(), Some("{\"thought\""));
        assert_eq!(parse_gemini_line("").unwrap(), None);
        assert_eq!(parse_gemini_line(": keep-alive").unwrap(), None);
        assert_eq!(parse_gemini_line(r#"data: {"candidates":[]}"#).unwrap(), None);
        assert!(parse_gemini_line(r#"data: {"error":{"message":"quota"}}"#).is_err());
    }

    #[test]
    fn test_ollama_line_parsing() {
        let line = r#"{"model":"qwen","message":{"role":"assistant","content":"{\"an"},"done":false}"#;
        assert_eq!(parse_ollama_line(line).unwrap().as_deref(), Some("{\"an"));
        assert_eq!(parse_ollama_line(r#"{"done":true}"#).unwrap(), None);
        assert_eq!(parse_ollama_line("not json").unwrap(), None);
        assert!(parse_ollama_line(r#"{"error":"model not found"}"#).is_err());
    }

    #[tokio::test]
    async fn test_lines_rejoin_split_reads() {
        let reads: Vec<Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"data: a\nda".to_vec()),
            Ok("ta: é".as_bytes()[..5].to_vec()),
            Ok("ta: é".as_bytes()[5..].to_vec()),
            Ok(b"\r\ntail".to_vec()),
        ];
        let collected: Vec<String> = lines(stream::iter(reads))
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(collected, vec!["data: a", "data: é", "tail"]);
    }

    #[test]
    fn test_gemini_body_shape() {
        let body = backend().gemini_body(&request("gemini-3-flash-preview"));
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        let contents = body["contents"].as_array().unwrap();
        // empty assistant turn is skipped
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[1]["parts"][1]["inlineData"]["mimeType"], "image/png");
        assert!(contents[1]["parts"][0]["text"].as_str().unwrap().contains("USER DIRECTIVE: Build a todo app"));
    }

    #[test]
    fn test_ollama_request_shape() {
        let req = backend().ollama_request(&request("qwen-coder"), true);
        assert_eq!(req.messages.first().map(|m| m.role.as_str()), Some("system"));
        assert_eq!(req.messages.last().map(|m| m.role.as_str()), Some("user"));
        assert_eq!(req.messages.len(), 4);
        assert_eq!(req.format, "json");
        assert!(req.stream);
    }

    #[tokio::test]
    async fn test_missing_gemini_key_fails_before_request() {
        let mut config = StudioConfig::default();
        config.llm.gemini.api_key = None;
        let backend = HttpChatBackend::from_config(&config, PromptsConfig::default()).unwrap();
        let err = backend.stream(&request("gemini-3-flash-preview")).await.err().unwrap();
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn test_parse_envelope() {
        assert!(parse_envelope("  ").is_err());
        assert!(parse_envelope("{\"answer\": 1}").is_err());
        assert_eq!(parse_envelope(" {\"answer\": \"ok\"} ").unwrap().answer, "ok");
    }
}
