use std::time::Duration;

use llm::builder::{LLMBackend, LLMBuilder};
use llm::chat::ChatMessage;
use tracing::debug;

use labmap_core::AssistSettings;

use crate::{AssistError, ChatRole, ChatTurn};

fn map_backend(provider: &str) -> Result<LLMBackend, AssistError> {
    match provider {
        "openai" => Ok(LLMBackend::OpenAI),
        "anthropic" => Ok(LLMBackend::Anthropic),
        "google" => Ok(LLMBackend::Google),
        "ollama" => Ok(LLMBackend::Ollama),
        "groq" => Ok(LLMBackend::Groq),
        "mistral" => Ok(LLMBackend::Mistral),
        "deepseek" => Ok(LLMBackend::DeepSeek),
        other => Err(AssistError::UnknownProvider(other.to_string())),
    }
}

fn to_messages(turns: &[ChatTurn]) -> Vec<ChatMessage> {
    turns
        .iter()
        .map(|t| match t.role {
            ChatRole::User => ChatMessage::user().content(&t.content).build(),
            ChatRole::Assistant => ChatMessage::assistant().content(&t.content).build(),
        })
        .collect()
}

/// One chat completion with the whole conversation, bounded by `timeout`.
pub async fn generate(
    settings: &AssistSettings,
    system: &str,
    turns: &[ChatTurn],
    timeout: Duration,
) -> Result<String, AssistError> {
    let backend = map_backend(&settings.provider)?;

    let mut builder = LLMBuilder::new()
        .backend(backend)
        .model(&settings.model)
        .temperature(settings.temperature)
        .max_tokens(settings.max_tokens)
        .system(system);

    if !settings.api_key.is_empty() {
        builder = builder.api_key(&settings.api_key);
    }
    if let Some(url) = &settings.base_url {
        builder = builder.base_url(url);
    }

    let llm = builder
        .build()
        .map_err(|e| AssistError::Provider(format!("build LLM: {e}")))?;

    let messages = to_messages(turns);
    debug!(
        provider = %settings.provider,
        model = %settings.model,
        turns = messages.len(),
        "sending chat request"
    );

    let response = tokio::time::timeout(timeout, llm.chat(&messages))
        .await
        .map_err(|_| AssistError::Timeout {
            secs: timeout.as_secs(),
        })?
        .map_err(|e| AssistError::Provider(format!("chat: {e}")))?;

    match response.text() {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(AssistError::EmptyResponse),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_providers_map() {
        assert!(matches!(map_backend("ollama"), Ok(LLMBackend::Ollama)));
        assert!(matches!(map_backend("anthropic"), Ok(LLMBackend::Anthropic)));
    }

    #[test]
    fn unknown_provider_is_an_error() {
        match map_backend("skynet") {
            Err(AssistError::UnknownProvider(p)) => assert_eq!(p, "skynet"),
            _ => panic!("expected UnknownProvider"),
        }
    }

    #[tokio::test]
    async fn unknown_provider_fails_before_any_request() {
        let settings = AssistSettings {
            provider: "skynet".into(),
            model: "t-800".into(),
            ..Default::default()
        };
        let turns = [ChatTurn {
            role: ChatRole::User,
            content: "hi".into(),
        }];
        let err = generate(&settings, "sys", &turns, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AssistError::UnknownProvider(_)));
    }
}
