use crate::error::GenerationError;
use crate::metrics::{Measurement, StreamMeter, TokenUsage};
use crate::prompt::Prompt;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: Prompt,
    pub model: String,
    pub stream: bool,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResult {
    pub content: String,
    pub measurement: Measurement,
}

/// One increment of a streamed reply.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Fragment(String),
    Usage(TokenUsage),
}

/// A chat-completion backend. Exactly one outbound call per `complete`.
pub trait ChatCompletion: Send + Sync {
    fn complete(
        &self,
        credential: Option<&str>,
        request: &CompletionRequest,
    ) -> impl Future<Output = Result<CompletionResult, GenerationError>> + Send;
}

#[derive(Clone)]
pub struct CompletionClient {
    http: Client,
    base_url: String,
}

impl CompletionClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Run a completion, handing each streamed fragment to `on_fragment` as it
    /// arrives. Without streaming, the whole reply is handed over once.
    pub async fn complete_with<F>(
        &self,
        credential: Option<&str>,
        request: &CompletionRequest,
        mut on_fragment: F,
    ) -> Result<CompletionResult, GenerationError>
    where
        F: FnMut(&str) + Send,
    {
        let credential = require_credential(credential)?;
        if !request.stream {
            let result = self.complete_blocking(credential, request).await?;
            on_fragment(&result.content);
            return Ok(result);
        }

        let started = Instant::now();
        let stream = self.open_stream(credential, request).await?;
        futures_util::pin_mut!(stream);

        let mut meter = StreamMeter::new();
        let mut content = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk? {
                StreamChunk::Fragment(text) => {
                    meter.record_fragment(started.elapsed(), &text);
                    on_fragment(&text);
                    content.push_str(&text);
                }
                StreamChunk::Usage(usage) => meter.record_usage(usage),
            }
        }
        let measurement = meter.finish(started.elapsed());
        tracing::info!(
            "Completion stream finished: model={}, fragments={}, usage={}, elapsed={:.2}s",
            request.model,
            measurement.fragments,
            measurement.usage.is_some(),
            measurement.elapsed.as_secs_f64()
        );
        Ok(CompletionResult {
            content,
            measurement,
        })
    }

    /// Non-streaming chat completion; TTFT equals total latency.
    async fn complete_blocking(
        &self,
        credential: &str,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, GenerationError> {
        log_request("JSON", request);
        let started = Instant::now();
        let resp = self.send(credential, request).await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        let payload: OaiChatResponse =
            serde_json::from_str(&body).map_err(|e| GenerationError::Provider {
                status,
                message: format!("unreadable completion payload: {}", e),
            })?;
        let elapsed = started.elapsed();

        let content = payload
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        let usage = payload.usage.map(OaiUsage::into_usage);
        tracing::info!(
            "Completion finished: model={}, chars={}, elapsed={:.2}s",
            request.model,
            content.len(),
            elapsed.as_secs_f64()
        );
        Ok(CompletionResult {
            content,
            measurement: Measurement::non_streaming(elapsed, usage),
        })
    }

    /// Streaming chat completion (SSE format), yielding fragments and the
    /// trailing usage report if the provider sends one.
    pub async fn open_stream(
        &self,
        credential: &str,
        request: &CompletionRequest,
    ) -> Result<impl Stream<Item = Result<StreamChunk, GenerationError>> + Send, GenerationError>
    {
        log_request("Stream", request);
        let resp = self.send(credential, request).await?;
        let status = resp.status().as_u16();

        // SSE: "data: {...}\n\n" lines, terminated by "data: [DONE]".
        let byte_stream = resp
            .bytes_stream()
            .map(|item| item.map_err(std::io::Error::other));
        let reader = tokio_util::io::StreamReader::new(byte_stream);
        let lines =
            tokio_util::codec::FramedRead::new(reader, tokio_util::codec::LinesCodec::new());

        Ok(lines
            .map(move |line| match line {
                Ok(line) => parse_sse_line(&line, status),
                Err(e) => vec![Err(GenerationError::Transport(format!("stream error: {}", e)))],
            })
            .flat_map(futures_util::stream::iter))
    }

    async fn send(
        &self,
        credential: &str,
        request: &CompletionRequest,
    ) -> Result<reqwest::Response, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = OaiRequest::from_request(request);
        let resp = self
            .http
            .post(url)
            .bearer_auth(credential)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        let message = provider_message(&text);
        tracing::warn!("Provider rejected request ({}): {}", status, message);
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(GenerationError::Authentication(message));
        }
        Err(GenerationError::Provider {
            status: status.as_u16(),
            message,
        })
    }
}

impl ChatCompletion for CompletionClient {
    fn complete(
        &self,
        credential: Option<&str>,
        request: &CompletionRequest,
    ) -> impl Future<Output = Result<CompletionResult, GenerationError>> + Send {
        self.complete_with(credential, request, |_| {})
    }
}

fn require_credential(credential: Option<&str>) -> Result<&str, GenerationError> {
    credential
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(GenerationError::missing_credential)
}

fn log_request(mode: &str, request: &CompletionRequest) {
    tracing::info!(
        "Completion request ({}): model={}, system_chars={}, user_chars={}\nUser: {:.200}...",
        mode,
        request.model,
        request.prompt.system.len(),
        request.prompt.user.len(),
        request.prompt.user
    );
}

/// Pull `error.message` (or `message`) out of a provider error body.
fn provider_message(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        v.pointer("/error/message")
            .or_else(|| v.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
    });
    match message {
        Some(m) => m,
        None if body.trim().is_empty() => "empty response body".to_string(),
        None => body.chars().take(500).collect(),
    }
}

fn parse_sse_line(line: &str, status: u16) -> Vec<Result<StreamChunk, GenerationError>> {
    let trimmed = line.trim();
    let Some(data) = trimmed.strip_prefix("data:").map(str::trim) else {
        return Vec::new();
    };
    if data.is_empty() || data == "[DONE]" {
        return Vec::new();
    }
    let chunk: OaiStreamChunk = match serde_json::from_str(data) {
        Ok(c) => c,
        Err(e) => {
            return vec![Err(GenerationError::Provider {
                status,
                message: format!("unreadable stream chunk: {} (data: {:.200})", e, data),
            })]
        }
    };

    let mut out = Vec::new();
    if let Some(error) = chunk.error {
        out.push(Err(GenerationError::Provider {
            status,
            message: error.message.unwrap_or_else(|| "stream error".to_string()),
        }));
        return out;
    }
    let content = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .unwrap_or_default();
    if !content.is_empty() {
        out.push(Ok(StreamChunk::Fragment(content)));
    }
    // Some providers attach usage to the final content chunk.
    if let Some(usage) = chunk.usage {
        out.push(Ok(StreamChunk::Usage(usage.into_usage())));
    }
    out
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct OaiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct OaiRequest<'a> {
    model: &'a str,
    messages: Vec<OaiMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<OaiStreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct OaiStreamOptions {
    include_usage: bool,
}

impl<'a> OaiRequest<'a> {
    fn from_request(request: &'a CompletionRequest) -> Self {
        Self {
            model: &request.model,
            messages: vec![
                OaiMessage {
                    role: "system",
                    content: &request.prompt.system,
                },
                OaiMessage {
                    role: "user",
                    content: &request.prompt.user,
                },
            ],
            stream: request.stream,
            stream_options: request.stream.then_some(OaiStreamOptions {
                include_usage: true,
            }),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OaiChatResponse {
    #[serde(default)]
    choices: Vec<OaiChoice>,
    #[serde(default)]
    usage: Option<OaiUsage>,
}

#[derive(Debug, Deserialize)]
struct OaiChoice {
    message: OaiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OaiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OaiStreamChunk {
    #[serde(default)]
    choices: Vec<OaiStreamChoice>,
    #[serde(default)]
    usage: Option<OaiUsage>,
    #[serde(default)]
    error: Option<OaiError>,
}

#[derive(Debug, Deserialize)]
struct OaiError {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OaiUsage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
    #[serde(default)]
    total_tokens: Option<u64>,
}

impl OaiUsage {
    fn into_usage(self) -> TokenUsage {
        let prompt_tokens = self.prompt_tokens.unwrap_or(0);
        let completion_tokens = self.completion_tokens.unwrap_or(0);
        TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: self
                .total_tokens
                .unwrap_or(prompt_tokens + completion_tokens),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OaiStreamChoice {
    #[serde(default)]
    delta: OaiStreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct OaiStreamDelta {
    #[serde(default)]
    content: Option<String>,
}
