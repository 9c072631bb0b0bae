//! Maps `/agents/{agent}/{name}` paths onto chat sessions.
//!
//! There is a single agent class, `chat`. The instance name becomes the
//! [`SessionKey`]. Anything that does not resolve is answered with
//! `404 Not found` by the server.

use crate::error::RoutingError;
use crate::session::SessionKey;

/// Routing name of the chat agent.
pub const CHAT_AGENT: &str = "chat";

const MAX_NAME_LEN: usize = 128;

/// Resolve an agent/instance pair to a session key.
pub fn resolve(agent: &str, name: &str) -> Result<SessionKey, RoutingError> {
    if agent != CHAT_AGENT {
        return Err(RoutingError::UnknownAgent(agent.to_string()));
    }
    if !is_valid_name(name) {
        return Err(RoutingError::InvalidName(name.to_string()));
    }
    Ok(SessionKey::new(name))
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_chat_sessions() {
        assert_eq!(resolve("chat", "default").unwrap().as_str(), "default");
        assert_eq!(resolve("chat", "user-42_a.b").unwrap().as_str(), "user-42_a.b");
    }

    #[test]
    fn test_agent_name_is_case_sensitive() {
        assert_eq!(
            resolve("Chat", "default"),
            Err(RoutingError::UnknownAgent("Chat".into()))
        );
        assert!(resolve("CHAT", "default").is_err());
    }

    #[test]
    fn test_unknown_agent() {
        assert_eq!(
            resolve("weather", "default"),
            Err(RoutingError::UnknownAgent("weather".into()))
        );
    }

    #[test]
    fn test_invalid_names() {
        assert!(matches!(resolve("chat", ""), Err(RoutingError::InvalidName(_))));
        assert!(matches!(resolve("chat", "a b"), Err(RoutingError::InvalidName(_))));
        assert!(matches!(resolve("chat", "../etc"), Err(RoutingError::InvalidName(_))));
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(resolve("chat", &long), Err(RoutingError::InvalidName(_))));
    }
}
