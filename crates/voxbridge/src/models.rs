use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single role-tagged message in a completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system<S: Into<String>>(content: S) -> Self {
        Message {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user<S: Into<String>>(content: S) -> Self {
        Message {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Body of one upstream completion call. Built per inbound utterance and
/// never mutated afterwards; `user` is the session tag passed upstream for
/// continuity.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl CompletionRequest {
    pub fn new<S: Into<String>>(model: S, messages: Vec<Message>) -> Self {
        CompletionRequest {
            model: model.into(),
            messages,
            stream: false,
            user: None,
        }
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn with_user<S: Into<String>>(mut self, user: S) -> Self {
        self.user = Some(user.into());
        self
    }
}
