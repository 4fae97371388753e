//! Conversation limits and per-client rate limiting.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{AssistError, ChatRole, ChatTurn};

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatLimits {
    pub max_requests_per_minute: u32,
    pub max_message_length: usize,
    pub max_messages: usize,
    #[serde(with = "millis")]
    pub request_timeout: Duration,
}

impl Default for ChatLimits {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 10,
            max_message_length: 2000,
            max_messages: 20,
            request_timeout: Duration::from_secs(30),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

fn parse_or_warn<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Option<T> {
    let raw = raw?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring invalid limit override");
            None
        }
    }
}

impl ChatLimits {
    /// Defaults overlaid with `RATE_LIMIT_RPM`, `MAX_MESSAGE_LENGTH`,
    /// `MAX_CONVERSATION_LENGTH` and `REQUEST_TIMEOUT` (milliseconds).
    pub fn from_env_with<F>(var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut limits = Self::default();
        if let Some(v) = parse_or_warn("RATE_LIMIT_RPM", var("RATE_LIMIT_RPM")) {
            limits.max_requests_per_minute = v;
        }
        if let Some(v) = parse_or_warn("MAX_MESSAGE_LENGTH", var("MAX_MESSAGE_LENGTH")) {
            limits.max_message_length = v;
        }
        if let Some(v) = parse_or_warn("MAX_CONVERSATION_LENGTH", var("MAX_CONVERSATION_LENGTH")) {
            limits.max_messages = v;
        }
        if let Some(ms) = parse_or_warn::<u64>("REQUEST_TIMEOUT", var("REQUEST_TIMEOUT")) {
            limits.request_timeout = Duration::from_millis(ms);
        }
        limits
    }

    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Shape checks on a conversation before any model call.
    pub fn validate(&self, turns: &[ChatTurn]) -> Result<(), AssistError> {
        let last = turns.last().ok_or(AssistError::EmptyConversation)?;
        if turns.len() > self.max_messages {
            return Err(AssistError::ConversationTooLong {
                max: self.max_messages,
            });
        }
        if last.role != ChatRole::User {
            return Err(AssistError::LastTurnNotUser);
        }
        if turns
            .iter()
            .any(|t| t.content.chars().count() > self.max_message_length)
        {
            return Err(AssistError::MessageTooLong {
                max: self.max_message_length,
            });
        }
        Ok(())
    }
}

struct Window {
    count: u32,
    resets_at: Instant,
}

/// Fixed one-minute window per client key.
pub struct RateLimiter {
    max_per_window: u32,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(max_per_window: u32) -> Self {
        Self {
            max_per_window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, client: &str, now: Instant) -> Result<(), AssistError> {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        windows.retain(|_, w| now < w.resets_at);

        let Some(window) = windows.get_mut(client) else {
            windows.insert(
                client.to_string(),
                Window {
                    count: 1,
                    resets_at: now + WINDOW,
                },
            );
            return Ok(());
        };

        if window.count >= self.max_per_window {
            let remaining = window.resets_at.saturating_duration_since(now);
            let retry_after_secs = (remaining.as_millis() as u64).div_ceil(1000);
            debug!(client, retry_after_secs, "rate limit hit");
            return Err(AssistError::RateLimited { retry_after_secs });
        }
        window.count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: ChatRole, content: &str) -> ChatTurn {
        ChatTurn {
            role,
            content: content.to_string(),
        }
    }

    #[test]
    fn empty_conversation_is_rejected() {
        let err = ChatLimits::default().validate(&[]).unwrap_err();
        assert!(matches!(err, AssistError::EmptyConversation));
    }

    #[test]
    fn last_turn_must_come_from_user() {
        let turns = [turn(ChatRole::User, "hi"), turn(ChatRole::Assistant, "hello")];
        let err = ChatLimits::default().validate(&turns).unwrap_err();
        assert!(matches!(err, AssistError::LastTurnNotUser));
    }

    #[test]
    fn long_conversations_are_rejected() {
        let limits = ChatLimits {
            max_messages: 2,
            ..Default::default()
        };
        let turns = [
            turn(ChatRole::User, "a"),
            turn(ChatRole::Assistant, "b"),
            turn(ChatRole::User, "c"),
        ];
        assert!(matches!(
            limits.validate(&turns),
            Err(AssistError::ConversationTooLong { max: 2 })
        ));
    }

    #[test]
    fn long_messages_are_rejected() {
        let limits = ChatLimits {
            max_message_length: 5,
            ..Default::default()
        };
        assert!(limits.validate(&[turn(ChatRole::User, "héllo")]).is_ok());
        assert!(matches!(
            limits.validate(&[turn(ChatRole::User, "hello!")]),
            Err(AssistError::MessageTooLong { max: 5 })
        ));
    }

    #[test]
    fn env_overrides_and_bad_values() {
        let limits = ChatLimits::from_env_with(|key| match key {
            "RATE_LIMIT_RPM" => Some("3".into()),
            "REQUEST_TIMEOUT" => Some("1500".into()),
            "MAX_MESSAGE_LENGTH" => Some("lots".into()),
            _ => None,
        });
        assert_eq!(limits.max_requests_per_minute, 3);
        assert_eq!(limits.request_timeout, Duration::from_millis(1500));
        assert_eq!(limits.max_message_length, 2000);
        assert_eq!(limits.max_messages, 20);
    }

    #[test]
    fn limiter_blocks_after_max_and_reports_retry() {
        let limiter = RateLimiter::new(2);
        let t0 = Instant::now();
        limiter.check("10.0.0.1", t0).unwrap();
        limiter.check("10.0.0.1", t0 + Duration::from_secs(1)).unwrap();

        let err = limiter
            .check("10.0.0.1", t0 + Duration::from_millis(30_500))
            .unwrap_err();
        match err {
            AssistError::RateLimited { retry_after_secs } => assert_eq!(retry_after_secs, 30),
            other => panic!("unexpected error: {other}"),
        }

        // other clients are independent
        limiter.check("10.0.0.2", t0 + Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn limiter_window_resets() {
        let limiter = RateLimiter::new(1);
        let t0 = Instant::now();
        limiter.check("c", t0).unwrap();
        assert!(limiter.check("c", t0 + Duration::from_secs(59)).is_err());
        limiter.check("c", t0 + Duration::from_secs(60)).unwrap();
    }
}
