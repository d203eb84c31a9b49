use crate::providers::{ChatRole, LlmProvider, LlmRequest, LlmStream, LlmStreamResponse};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use greenhouse_common::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::debug;

const OPENAI_API_URL: &str = "https://api.openai.com/v1";

#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| OPENAI_API_URL.to_string()),
        }
    }

    fn convert_request(&self, request: &LlmRequest) -> OpenAiRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);

        if let Some(system_prompt) = &request.system {
            messages.push(OpenAiMessage {
                role: ChatRole::System,
                content: system_prompt.clone(),
            });
        }

        messages.extend(request.messages.iter().map(|m| OpenAiMessage {
            role: m.role,
            content: m.content.clone(),
        }));

        OpenAiRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: true,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_id(&self) -> &str {
        "openai"
    }

    async fn complete_stream(&self, request: &LlmRequest) -> Result<LlmStream> {
        let url = format!("{}/chat/completions", self.base_url);
        let openai_request = self.convert_request(request);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&openai_request)
            .send()
            .await
            .map_err(|e| Error::UpstreamOpen(format!("OpenAI request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamOpen(format!(
                "OpenAI API error ({status}): {error_text}"
            )));
        }

        debug!(model = %request.model, "OpenAI stream opened");
        Ok(Box::pin(SseParser::new(response.bytes_stream())))
    }
}

// Request Types
#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    stream: bool,
}

#[derive(Serialize)]
struct OpenAiMessage {
    role: ChatRole,
    content: String,
}

// Stream Response Types
#[derive(Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: OpenAiStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct OpenAiStreamDelta {
    content: Option<String>,
}

/// Turns the raw SSE byte stream into text deltas.
///
/// Completion is signalled by the `[DONE]` sentinel (or a `finish_reason`); a
/// body that ends before either is reported as a broken stream.
struct SseParser {
    stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: Vec<u8>,
    queue: VecDeque<Result<LlmStreamResponse>>,
    finished: bool,
    exhausted: bool,
    done: bool,
}

impl SseParser {
    fn new(stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static) -> Self {
        Self {
            stream: Box::pin(stream),
            buffer: Vec::new(),
            queue: VecDeque::new(),
            finished: false,
            exhausted: false,
            done: false,
        }
    }

    /// Split complete events off the front of the buffer.
    fn drain_events(&mut self) {
        while let Some((pos, len)) = find_event_boundary(&self.buffer) {
            let event: Vec<u8> = self.buffer.drain(..pos).collect();
            self.buffer.drain(..len);
            self.handle_event(&event);
        }
    }

    fn handle_event(&mut self, event: &[u8]) {
        let Ok(text) = std::str::from_utf8(event) else {
            self.queue.push_back(Err(Error::UpstreamStream(
                "invalid UTF-8 in event stream".to_string(),
            )));
            return;
        };

        for line in text.lines() {
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                self.done = true;
                return;
            }

            match serde_json::from_str::<OpenAiStreamChunk>(data) {
                Ok(chunk) => {
                    for choice in chunk.choices {
                        if choice.finish_reason.is_some() {
                            self.finished = true;
                        }
                        let delta = choice.delta.content.unwrap_or_default();
                        if delta.is_empty() && choice.finish_reason.is_none() {
                            continue;
                        }
                        self.queue.push_back(Ok(LlmStreamResponse {
                            delta,
                            stop_reason: choice.finish_reason,
                        }));
                    }
                }
                Err(e) => {
                    self.queue
                        .push_back(Err(Error::UpstreamStream(format!("JSON parse error: {e}"))));
                }
            }
        }
    }
}

fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

impl Stream for SseParser {
    type Item = Result<LlmStreamResponse>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(item) = self.queue.pop_front() {
                return Poll::Ready(Some(item));
            }
            if self.done {
                return Poll::Ready(None);
            }
            if self.exhausted {
                self.done = true;
                if self.finished {
                    return Poll::Ready(None);
                }
                return Poll::Ready(Some(Err(Error::UpstreamStream(
                    "stream closed before completion".to_string(),
                ))));
            }

            match self.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.buffer.extend_from_slice(&chunk);
                    self.drain_events();
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(Error::UpstreamStream(format!(
                        "stream error: {e}"
                    )))));
                }
                Poll::Ready(None) => {
                    self.exhausted = true;
                    // A trailing event may lack the blank-line terminator.
                    if !self.buffer.is_empty() {
                        let rest = std::mem::take(&mut self.buffer);
                        self.handle_event(&rest);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
