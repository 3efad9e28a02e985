//! Comment model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A comment on a post. Only approved comments are ever shown to visitors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    /// Set when a logged-in user wrote the comment
    pub author_id: Option<i64>,
    pub author_name: String,
    #[serde(skip_serializing)]
    pub author_email: String,
    pub content: String,
    pub approved: bool,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn gravatar_hash(&self) -> String {
        format!(
            "{:x}",
            md5::compute(self.author_email.trim().to_lowercase())
        )
    }
}

/// Public rendering of a comment; the email is replaced by its avatar hash
#[derive(Debug, Clone, Serialize)]
pub struct CommentView {
    pub id: i64,
    pub post_id: i64,
    pub author_name: String,
    pub gravatar: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Comment> for CommentView {
    fn from(c: &Comment) -> Self {
        Self {
            id: c.id,
            post_id: c.post_id,
            author_name: c.author_name.clone(),
            gravatar: c.gravatar_hash(),
            content: c.content.clone(),
            created_at: c.created_at,
        }
    }
}

/// Comment submission. Name and email are ignored for logged-in users.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateCommentInput {
    pub content: String,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub author_email: Option<String>,
}
