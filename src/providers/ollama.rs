use crate::config::OllamaConfig;
use crate::providers::ndjson::{LineBuffer, decode_line};
use crate::providers::traits::{
    ChatMessage, ChatRequest, Fragment, FragmentStream, GenerationError, Provider,
};
use crate::util::error_excerpt;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt, stream};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaProvider {
    base_url: String,
    client: Client,
}

// ─── Request Structures ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<Options>,
}

#[derive(Debug, Serialize)]
struct Options {
    temperature: f64,
}

// ─── Response Structures ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    name: String,
}

// ─── Implementation ───────────────────────────────────────────────────────────

impl OllamaProvider {
    pub fn new(base_url: Option<&str>) -> Self {
        Self::with_timeouts(base_url, Duration::from_secs(300), Duration::from_secs(10))
    }

    pub fn from_config(config: &OllamaConfig) -> Self {
        Self::with_timeouts(
            Some(&config.base_url),
            Duration::from_secs(config.request_timeout_secs),
            Duration::from_secs(config.connect_timeout_secs),
        )
    }

    /// `request_timeout` bounds the whole request, streamed body included.
    pub fn with_timeouts(
        base_url: Option<&str>,
        request_timeout: Duration,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            client: Client::builder()
                .timeout(request_timeout)
                .connect_timeout(connect_timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn transport(context: &str, err: &reqwest::Error) -> GenerationError {
    let kind = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    GenerationError::Transport(format!("{context} {kind}: {err}"))
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<FragmentStream, GenerationError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ApiChatRequest {
            model: &request.model,
            messages: &request.messages,
            stream: true,
            options: request.temperature.map(|temperature| Options { temperature }),
        };

        tracing::debug!(
            url = %url,
            model = %request.model,
            message_count = request.messages.len(),
            "Ollama stream request"
        );

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport("Ollama chat", &e))?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let excerpt = error_excerpt(&raw);
            tracing::error!(status = %status, body_excerpt = %excerpt, "Ollama error response");
            return Err(GenerationError::Transport(format!(
                "Ollama API error ({status}): {excerpt}"
            )));
        }

        Ok(decode_stream(response.bytes_stream()))
    }

    async fn list_models(&self) -> Result<Vec<String>, GenerationError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport("Ollama tags", &e))?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            return Err(GenerationError::Transport(format!(
                "Ollama API error ({status}): {}",
                error_excerpt(&raw)
            )));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Protocol(format!("invalid /api/tags response: {e}")))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

// ─── Stream decoding ──────────────────────────────────────────────────────────

struct DecodeState<S> {
    body: Pin<Box<S>>,
    lines: LineBuffer,
    queue: VecDeque<Result<Fragment, GenerationError>>,
    exhausted: bool,
}

/// Turn a raw byte stream into a fragment stream.
///
/// The stream ends after [`Fragment::Done`] or the first error. A body that
/// ends without a `done` marker simply ends the stream.
pub fn decode_stream<S, B, E>(body: S) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        lines: LineBuffer::new(),
        queue: VecDeque::new(),
        exhausted: false,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.queue.pop_front() {
                if matches!(item, Ok(Fragment::Done) | Err(_)) {
                    st.queue.clear();
                    st.exhausted = true;
                }
                return Some((item, st));
            }
            if st.exhausted {
                return None;
            }

            match st.body.next().await {
                Some(Ok(chunk)) => {
                    for line in st.lines.push(chunk.as_ref()) {
                        enqueue_line(&mut st.queue, &line);
                    }
                }
                Some(Err(e)) => {
                    st.queue.push_back(Err(GenerationError::Transport(format!(
                        "stream read failed: {e}"
                    ))));
                }
                None => {
                    if let Some(tail) = st.lines.finish() {
                        enqueue_line(&mut st.queue, &tail);
                    }
                    st.exhausted = true;
                }
            }
        }
    }))
}

fn enqueue_line(queue: &mut VecDeque<Result<Fragment, GenerationError>>, line: &[u8]) {
    match decode_line(line) {
        Ok(fragments) => queue.extend(fragments.into_iter().map(Ok)),
        Err(e) => queue.push_back(Err(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Vec<u8>, String>> + Send + 'static {
        let owned: Vec<Result<Vec<u8>, String>> =
            parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(owned)
    }

    async fn collect(s: FragmentStream) -> Vec<Result<Fragment, GenerationError>> {
        s.collect().await
    }

    fn token(content: &str) -> Result<Fragment, GenerationError> {
        Ok(Fragment::Token {
            role: "assistant".into(),
            content: content.into(),
        })
    }

    #[test]
    fn new_trims_trailing_slash() {
        let p = OllamaProvider::new(Some("http://gpu-box:11434/"));
        assert_eq!(p.base_url(), "http://gpu-box:11434");
        assert_eq!(OllamaProvider::new(None).base_url(), DEFAULT_BASE_URL);
    }

    #[test]
    fn request_omits_options_without_temperature() {
        let messages = vec![ChatMessage::user("hi")];
        let body = ApiChatRequest {
            model: "llama3.2",
            messages: &messages,
            stream: true,
            options: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["stream"], true);
        assert!(json.get("options").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[tokio::test]
    async fn decodes_fragments_split_across_chunks() {
        let s = decode_stream(chunks(&[
            "{\"message\":{\"role\":\"assistant\",\"content\":\"The \"},\"done\":false}\n{\"mess",
            "age\":{\"role\":\"assistant\",\"content\":\"sky\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
        ]));
        assert_eq!(
            collect(s).await,
            vec![token("The "), token("sky"), Ok(Fragment::Done)]
        );
    }

    #[tokio::test]
    async fn stream_stops_after_done() {
        let s = decode_stream(chunks(&[
            "{\"done\":true}\n{\"message\":{\"role\":\"assistant\",\"content\":\"late\"},\"done\":false}\n",
        ]));
        assert_eq!(collect(s).await, vec![Ok(Fragment::Done)]);
    }

    #[tokio::test]
    async fn eof_without_done_flushes_tail_and_ends() {
        let s = decode_stream(chunks(&[
            "{\"message\":{\"role\":\"assistant\",\"content\":\"a\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"b\"},\"done\":false}",
        ]));
        assert_eq!(collect(s).await, vec![token("a"), token("b")]);
    }

    #[tokio::test]
    async fn malformed_line_ends_stream_with_protocol_error() {
        let s = decode_stream(chunks(&[
            "{\"message\":{\"role\":\"assistant\",\"content\":\"ok\"},\"done\":false}\n<html>\n",
            "{\"done\":true}\n",
        ]));
        let items = collect(s).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], token("ok"));
        assert!(matches!(items[1], Err(GenerationError::Protocol(_))));
    }

    #[tokio::test]
    async fn read_error_becomes_transport_error() {
        let parts: Vec<Result<Vec<u8>, String>> = vec![
            Ok(b"{\"message\":{\"role\":\"assistant\",\"content\":\"x\"},\"done\":false}\n".to_vec()),
            Err("connection reset".to_string()),
        ];
        let items = collect(decode_stream(stream::iter(parts))).await;
        assert_eq!(items[0], token("x"));
        match &items[1] {
            Err(GenerationError::Transport(msg)) => assert!(msg.contains("connection reset")),
            other => panic!("expected transport error, got {other:?}"),
        }
        assert_eq!(items.len(), 2);
    }
}
