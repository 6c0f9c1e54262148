//! Command layer
//!
//! Entry points called by the outer transport. Every command catches errors
//! at its boundary and answers with a [`CommandReply`]; commands that change
//! the session take it by value and hand it back.

pub mod connections;
pub mod groups;
mod state;

use std::fmt;

use serde::Serialize;
use tracing::warn;

use crate::error::CoreError;

pub use state::CoreState;

/// Uniform `{ data, message, is_error }` answer
#[derive(Debug, Clone, Serialize)]
pub struct CommandReply<T> {
    pub data: Option<T>,
    pub message: String,
    pub is_error: bool,
}

impl<T> CommandReply<T> {
    pub fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            message: String::new(),
            is_error: false,
        }
    }

    pub fn error(message: impl fmt::Display) -> Self {
        Self {
            data: None,
            message: message.to_string(),
            is_error: true,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn from_result(command: &str, result: Result<T, CoreError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => {
                warn!("{} failed: {}", command, e);
                Self::error(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_shape() {
        let reply = CommandReply::ok(3).with_message("done");
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["data"], 3);
        assert_eq!(json["message"], "done");
        assert_eq!(json["is_error"], false);

        let reply: CommandReply<()> =
            CommandReply::from_result("test", Err(CoreError::Ownership("group")));
        assert!(reply.is_error);
        assert!(reply.data.is_none());
        assert_eq!(reply.message, "This group does not belong to you.");
    }
}
