use crate::generator::{Generator, TextStream, single_fragment};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Default, Deserialize)]
pub struct GeminiResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    pub content: Option<Content>,
}

#[derive(Debug, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
pub struct Part {
    pub text: Option<String>,
}

impl GeminiResponse {
    /// Concatenated text of the first candidate, if it has any.
    pub fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect();
        Some(text)
    }
}

/// Gemini `generateContent` client.
///
/// With `streaming` enabled the reply is requested over server-sent events and each
/// event's text is yielded as its own fragment as soon as it arrives.
pub struct GeminiGenerator {
    client: Client,
    api_key: SecretString,
    model: String,
    streaming: bool,
}

impl GeminiGenerator {
    pub fn new(api_key: SecretString, model: String, streaming: bool) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            streaming,
        }
    }

    fn endpoint(&self) -> String {
        if self.streaming {
            format!(
                "{GEMINI_API_BASE}/models/{}:streamGenerateContent?alt=sse",
                self.model
            )
        } else {
            format!("{GEMINI_API_BASE}/models/{}:generateContent", self.model)
        }
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn generate(&self, instruction: &str) -> Result<TextStream> {
        let body = serde_json::json!({
            "contents": [
                { "role": "user", "parts": [ { "text": instruction } ] }
            ]
        });

        let resp = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .context("Failed to reach the Gemini API")?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            anyhow::bail!("Gemini returned HTTP {status}: {detail}");
        }

        if !self.streaming {
            let reply = resp
                .json::<GeminiResponse>()
                .await
                .context("Failed to decode Gemini response")?;
            let text = reply
                .text()
                .ok_or_else(|| anyhow::anyhow!("Gemini returned no candidates"))?;
            return Ok(single_fragment(text));
        }

        Ok(text_fragments(Box::pin(resp.bytes_stream())))
    }
}

/// Decodes a `streamGenerateContent` event stream into reply fragments. Events
/// without text are skipped; an undecodable event is an error fragment.
fn text_fragments<S>(byte_stream: S) -> TextStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + Unpin + 'static,
{
    let fragments = sse_data(byte_stream).filter_map(|data| async move {
        match data {
            Ok(data) => match serde_json::from_str::<GeminiResponse>(&data) {
                Ok(chunk) => chunk.text().filter(|t| !t.is_empty()).map(Ok),
                Err(e) => Some(Err(anyhow::anyhow!("Malformed Gemini stream chunk: {e}"))),
            },
            Err(e) => Some(Err(e)),
        }
    });
    Box::pin(fragments)
}

/// Yields the payload of every `data:` line in a server-sent event byte stream.
/// Transport errors are yielded once and end the stream.
fn sse_data<S>(byte_stream: S) -> impl Stream<Item = Result<String>> + Send + 'static
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + Unpin + 'static,
{
    futures::stream::unfold(
        (byte_stream, BytesMut::with_capacity(8192), false),
        |(mut stream, mut buffer, done)| async move {
            if done {
                return None;
            }

            loop {
                if let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                    let line = buffer.split_to(newline + 1);
                    if let Some(data) = data_payload(&line) {
                        return Some((Ok(data), (stream, buffer, false)));
                    }
                    continue;
                }

                match stream.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        let err = anyhow::Error::new(e).context("Gemini stream interrupted");
                        return Some((Err(err), (stream, buffer, true)));
                    }
                    None => {
                        // Final event may arrive without a trailing newline.
                        let data = data_payload(&buffer);
                        buffer.clear();
                        return data.map(|data| (Ok(data), (stream, buffer, true)));
                    }
                }
            }
        },
    )
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = std::str::from_utf8(line).ok()?.trim();
    let data = line
        .strip_prefix("data:")
        .map(str::trim)
        .filter(|data| !data.is_empty() && *data != "[DONE]")?;
    Some(data.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_stream(
        chunks: Vec<&'static str>,
    ) -> impl Stream<Item = reqwest::Result<Bytes>> + Send + Unpin + 'static {
        futures::stream::iter(
            chunks
                .into_iter()
                .map(|chunk| Ok::<_, reqwest::Error>(Bytes::from_static(chunk.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn extracts_first_candidate_text() {
        let payload = r#"{"candidates":[{"content":{"parts":[{"text":"Your glucose "},{"text":"is 156."}],"role":"model"}}]}"#;

        let reply: GeminiResponse = serde_json::from_str(payload).unwrap();

        assert_eq!(reply.text().as_deref(), Some("Your glucose is 156."));
    }

    #[test]
    fn missing_candidates_yield_no_text() {
        let reply: GeminiResponse = serde_json::from_str(r#"{"promptFeedback":{}}"#).unwrap();
        assert!(reply.text().is_none());
    }

    #[test]
    fn data_payload_skips_comments_and_done() {
        assert_eq!(data_payload(b"data: {\"a\":1}\r\n").as_deref(), Some("{\"a\":1}"));
        assert_eq!(data_payload(b": keep-alive\n"), None);
        assert_eq!(data_payload(b"data: [DONE]\n"), None);
        assert_eq!(data_payload(b"\n"), None);
    }

    #[tokio::test]
    async fn reassembles_events_split_across_chunks() {
        let stream = byte_stream(vec![
            "data: {\"n\":",
            "1}\n\ndata: {\"n\":2}\n",
            "\ndata: {\"n\":3}",
        ]);

        let events: Vec<String> = sse_data(stream).map(|e| e.unwrap()).collect().await;

        assert_eq!(events, vec!["{\"n\":1}", "{\"n\":2}", "{\"n\":3}"]);
    }

    #[tokio::test]
    async fn streamed_chunks_become_fragments_and_bad_chunks_become_errors() {
        let stream = byte_stream(vec![
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Your TSH \"}]}}]}\n\n",
            "data: {\"candidates\":[]}\n\n",
            "data: not json at all\n\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"is normal.\"}]}}]}\n",
        ]);

        let items: Vec<Result<String>> = text_fragments(stream).collect().await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap(), "Your TSH ");
        let err = items[1].as_ref().err().unwrap();
        assert!(err.to_string().starts_with("Malformed Gemini stream chunk"));
        assert_eq!(items[2].as_ref().unwrap(), "is normal.");
    }
}
