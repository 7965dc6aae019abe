use async_trait::async_trait;
use futures_util::StreamExt;

use crate::errors::{OperatorError, OperatorResult};
use crate::llm::provider::LlmProvider;
use crate::llm::sse_parser;
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse, StreamChunkKind};

pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String) -> Self {
        Self {
            id,
            api_base,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn chat(&self, messages: Vec<ChatMessage>, cfg: &CallConfig) -> OperatorResult<LlmResponse> {
        let body = serde_json::json!({
            "model": cfg.model,
            "messages": &messages,
            "stream": cfg.stream,
            "temperature": cfg.temperature,
        });

        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            stream = cfg.stream,
            messages = messages.len(),
            "sending LLM request"
        );
        tracing::trace!(body = %redact_images(&body), "request body (base64 omitted)");

        let mut request = self.client.post(&self.api_base).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(OperatorError::LlmProvider(format!("{}: {}", status, err_body)));
        }

        if cfg.stream {
            self.handle_stream(response).await
        } else {
            self.handle_json(response).await
        }
    }
}

impl OpenAiCompatibleProvider {
    /// Accumulate an SSE streaming response into a single reply.
    async fn handle_stream(&self, response: reqwest::Response) -> OperatorResult<LlmResponse> {
        let mut byte_stream = response.bytes_stream();
        let mut lines = LineAssembler::default();
        let mut content = String::new();
        let mut reasoning = String::new();

        'stream: while let Some(result) = byte_stream.next().await {
            let bytes = result?;
            for line in lines.feed(&bytes) {
                match sse_parser::parse_sse_line(&line) {
                    Ok(Some(chunk)) => match chunk.kind {
                        StreamChunkKind::Reasoning => reasoning.push_str(&chunk.content),
                        StreamChunkKind::Content => {
                            tracing::trace!(delta = %chunk.content, "stream chunk");
                            content.push_str(&chunk.content);
                        }
                        StreamChunkKind::Error => {
                            return Err(OperatorError::LlmProvider(chunk.content));
                        }
                        StreamChunkKind::Done => break 'stream,
                    },
                    Ok(None) => {}
                    Err(e) => {
                        tracing::debug!("SSE parse skipped: {e}");
                    }
                }
            }
        }

        tracing::info!(
            content_len = content.len(),
            reasoning_len = reasoning.len(),
            "LLM stream complete"
        );

        Ok(LlmResponse {
            content,
            reasoning,
            session_token: None,
        })
    }

    async fn handle_json(&self, response: reqwest::Response) -> OperatorResult<LlmResponse> {
        let json: serde_json::Value = response.json().await?;
        let response = parse_completion(&json)?;
        tracing::info!(content_len = response.content.len(), "LLM JSON response received");
        Ok(response)
    }
}

/// Splits a byte stream into trimmed, non-empty lines. Bytes are held
/// until a full line arrives, so a UTF-8 sequence split across network
/// chunks is decoded whole.
#[derive(Debug, Default)]
struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..pos]);
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }
}

/// Extract the reply from a non-streaming chat completion body.
fn parse_completion(json: &serde_json::Value) -> OperatorResult<LlmResponse> {
    if let Some(message) = json["error"]["message"].as_str() {
        return Err(OperatorError::LlmProvider(message.to_string()));
    }
    let message = &json["choices"][0]["message"];
    let content = message["content"].as_str().ok_or_else(|| {
        OperatorError::LlmProvider("response has no choices[0].message.content".into())
    })?;
    Ok(LlmResponse {
        content: content.to_string(),
        reasoning: message["reasoning_content"].as_str().unwrap_or("").to_string(),
        session_token: json["id"].as_str().map(str::to_string),
    })
}

/// Clone the body replacing image payloads, so debug logs stay readable.
fn redact_images(body: &serde_json::Value) -> String {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for msg in msgs {
            let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(|t| t.as_str()) == Some("image_url") {
                    if let Some(url) = part.get_mut("image_url").and_then(|u| u.get_mut("url")) {
                        *url = serde_json::Value::String("<omitted_base64_image>".to_string());
                    }
                }
            }
        }
    }
    serde_json::to_string(&log_body).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ChatMessage;

    #[test]
    fn completion_content_and_id() {
        let json = serde_json::json!({
            "id": "chatcmpl-42",
            "choices": [{"message": {"role": "assistant", "content": "DONE"}}]
        });
        let resp = parse_completion(&json).unwrap();
        assert_eq!(resp.content, "DONE");
        assert_eq!(resp.session_token.as_deref(), Some("chatcmpl-42"));
    }

    #[test]
    fn completion_error_body() {
        let json = serde_json::json!({"error": {"message": "quota exceeded"}});
        let err = parse_completion(&json).unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn split_multibyte_char_survives_chunking() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"TYPE caf\u{e9}\"}}]}\n";
        let bytes = line.as_bytes();
        let cut = line.find('\u{e9}').unwrap() + 1;

        let mut lines = LineAssembler::default();
        assert!(lines.feed(&bytes[..cut]).is_empty());
        let out = lines.feed(&bytes[cut..]);
        assert_eq!(out.len(), 1);
        assert!(out[0].contains("caf\u{e9}"));
        assert!(!out[0].contains('\u{fffd}'));

        let chunk = sse_parser::parse_sse_line(&out[0]).unwrap().unwrap();
        assert_eq!(chunk.content, "TYPE caf\u{e9}");
    }

    #[test]
    fn blank_and_crlf_lines_are_dropped() {
        let mut lines = LineAssembler::default();
        let out = lines.feed(b"data: a\r\n\r\n: keepalive\n");
        assert_eq!(out, vec!["data: a".to_string(), ": keepalive".to_string()]);
    }

    #[test]
    fn images_are_redacted_in_logs() {
        let body = serde_json::json!({
            "messages": [ChatMessage::user_with_image("SECRETPIXELS", "next?")]
        });
        let logged = redact_images(&body);
        assert!(!logged.contains("SECRETPIXELS"));
        assert!(logged.contains("<omitted_base64_image>"));
    }
}
