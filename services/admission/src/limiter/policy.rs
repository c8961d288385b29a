use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Semantic action a window applies to. Each class owns a key namespace so
/// that, say, login attempts never share a counter with chat messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionClass {
    Login,
    Register,
    ChatMessage,
}

impl ActionClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionClass::Login => "login",
            ActionClass::Register => "register",
            ActionClass::ChatMessage => "chat",
        }
    }
}

impl fmt::Display for ActionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    pub fn new(action: ActionClass, identity: &str) -> Self {
        Self(format!("{}:{}", action.as_str(), identity))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowRule {
    pub max_attempts: u32,
    pub window: Duration,
}

impl WindowRule {
    pub const fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowRules {
    pub login: WindowRule,
    pub register: WindowRule,
    pub chat: WindowRule,
}

impl Default for WindowRules {
    fn default() -> Self {
        Self {
            login: WindowRule::new(5, Duration::from_secs(15 * 60)),
            register: WindowRule::new(3, Duration::from_secs(60 * 60)),
            chat: WindowRule::new(10, Duration::from_secs(60)),
        }
    }
}

impl WindowRules {
    pub fn for_action(&self, action: ActionClass) -> WindowRule {
        match action {
            ActionClass::Login => self.login,
            ActionClass::Register => self.register,
            ActionClass::ChatMessage => self.chat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_namespaced_by_action() {
        let login = RateLimitKey::new(ActionClass::Login, "10.0.0.1");
        let chat = RateLimitKey::new(ActionClass::ChatMessage, "10.0.0.1");
        assert_eq!(login.as_str(), "login:10.0.0.1");
        assert_eq!(chat.as_str(), "chat:10.0.0.1");
        assert_ne!(login, chat);
    }

    #[test]
    fn test_default_rules() {
        let rules = WindowRules::default();
        assert_eq!(rules.for_action(ActionClass::Login).max_attempts, 5);
        assert_eq!(
            rules.for_action(ActionClass::Register).window,
            Duration::from_secs(3600)
        );
        assert_eq!(rules.for_action(ActionClass::ChatMessage).max_attempts, 10);
    }
}
