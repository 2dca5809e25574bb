use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Fragments of one generated reply, in order. A provider that answers in one
/// piece yields a single fragment.
pub type TextStream = BoxStream<'static, Result<String>>;

/// Wraps a complete reply as a one-fragment [`TextStream`].
pub fn single_fragment(text: impl Into<String>) -> TextStream {
    Box::pin(stream::once(futures::future::ready(Ok(text.into()))))
}

/// The text-generation service as seen by a walkthrough session.
///
/// One generator is shared by every live session and may be called concurrently.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, instruction: &str) -> Result<TextStream>;
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub content: Option<String>,
}

pub const OPENAI_CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Chat-completions client. Always answers with a single fragment.
pub struct OpenAiGenerator {
    client: Client,
    api_key: SecretString,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(api_key: SecretString, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, instruction: &str) -> Result<TextStream> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": instruction }
            ]
        });

        let resp = self
            .client
            .post(OPENAI_CHAT_COMPLETIONS_URL)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .context("Failed to reach the chat completions endpoint")?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            anyhow::bail!("Chat completions returned HTTP {status}: {detail}");
        }

        let resp = resp
            .json::<LlmResponse>()
            .await
            .context("Failed to decode chat completions response")?;

        let answer = resp
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow::anyhow!("No response from LLM"))?;

        Ok(single_fragment(answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn single_fragment_yields_exactly_one_item() {
        let fragments: Vec<String> = single_fragment("hello")
            .map(|fragment| fragment.unwrap())
            .collect()
            .await;

        assert_eq!(fragments, vec!["hello".to_string()]);
    }

    #[test]
    fn decodes_chat_completion_payload() {
        let payload = r#"{"choices":[{"message":{"role":"assistant","content":"Hi there."}}]}"#;

        let resp: LlmResponse = serde_json::from_str(payload).unwrap();

        assert_eq!(resp.choices[0].message.content.as_deref(), Some("Hi there."));
    }

    #[tokio::test]
    async fn mock_generator_can_script_failures() {
        let mut mock = MockGenerator::new();
        mock.expect_generate()
            .returning(|_instruction| Err(anyhow::anyhow!("quota exceeded")))
            .once();

        let err = mock.generate("anything").await.err().unwrap();

        assert_eq!(err.to_string(), "quota exceeded");
    }
}
