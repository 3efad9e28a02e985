//! Comment service
//!
//! Visitors and logged-in users comment on published posts. Depending on the
//! `comment_moderation` setting a comment is approved on arrival or waits for
//! an administrator. Only approved comments reach public pages.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::db::repositories::{CommentRepository, PostRepository, UserRepository};
use crate::models::{Comment, CommentView, CreateCommentInput, ListParams, PagedResult, User};
use crate::plugin::{hook_names, HookManager};
use crate::services::email::EmailService;
use crate::services::settings::{keys, SettingsService};

pub const CONTENT_MAX_LENGTH: usize = 5000;
pub const NAME_MAX_LENGTH: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum CommentServiceError {
    #[error("Comment not found: {0}")]
    NotFound(i64),

    #[error("Post not found: {0}")]
    PostNotFound(i64),

    #[error("Comments are disabled")]
    Disabled,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct CommentService {
    repo: Arc<dyn CommentRepository>,
    posts: Arc<dyn PostRepository>,
    users: Arc<dyn UserRepository>,
    settings: Arc<SettingsService>,
    email: Option<Arc<EmailService>>,
    base_url: String,
    hooks: Option<Arc<HookManager>>,
}

impl CommentService {
    pub fn new(
        repo: Arc<dyn CommentRepository>,
        posts: Arc<dyn PostRepository>,
        users: Arc<dyn UserRepository>,
        settings: Arc<SettingsService>,
    ) -> Self {
        Self {
            repo,
            posts,
            users,
            settings,
            email: None,
            base_url: String::new(),
            hooks: None,
        }
    }

    /// Notify post authors about new comments
    pub fn with_email(mut self, email: Arc<EmailService>, base_url: impl Into<String>) -> Self {
        self.email = Some(email);
        self.base_url = base_url.into();
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<HookManager>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    fn trigger_hook(&self, name: &str, data: serde_json::Value) {
        if let Some(hooks) = &self.hooks {
            hooks.trigger(name, data);
        }
    }

    /// Add a comment to a published post.
    ///
    /// Logged-in authors sign with their account; anonymous visitors must give
    /// a name and an email.
    pub async fn create(
        &self,
        post_id: i64,
        author: Option<&User>,
        input: CreateCommentInput,
    ) -> Result<Comment, CommentServiceError> {
        if !self.settings.get_bool(keys::ENABLE_COMMENTS, true).await? {
            return Err(CommentServiceError::Disabled);
        }

        let content = input.content.trim().to_string();
        let len = content.chars().count();
        if len == 0 || len > CONTENT_MAX_LENGTH {
            return Err(CommentServiceError::ValidationError(format!(
                "Comment must be between 1 and {} characters",
                CONTENT_MAX_LENGTH
            )));
        }

        let post = self
            .posts
            .get_by_id(post_id)
            .await?
            .filter(|p| p.published)
            .ok_or(CommentServiceError::PostNotFound(post_id))?;

        let (author_id, author_name, author_email) = match author {
            Some(user) => (Some(user.id), user.username.clone(), user.email.clone()),
            None => anonymous_author(&input)?,
        };

        let moderated = self.settings.get_bool(keys::COMMENT_MODERATION, true).await?;
        let approved = !moderated || author.is_some_and(|u| u.is_admin);

        let comment = Comment {
            id: 0,
            post_id,
            author_id,
            author_name,
            author_email,
            content,
            approved,
            created_at: Utc::now(),
        };
        let comment = self.repo.create(&comment).await?;
        debug!(
            "Comment {} on post {} (approved: {})",
            comment.id, post_id, comment.approved
        );

        self.trigger_hook(
            hook_names::COMMENT_CREATED,
            json!({ "id": comment.id, "post_id": post_id, "approved": comment.approved }),
        );
        self.notify_author(&post, &comment).await;
        Ok(comment)
    }

    async fn notify_author(&self, post: &crate::models::Post, comment: &Comment) {
        let Some(email) = &self.email else { return };
        if comment.author_id == Some(post.author_id) {
            return;
        }
        let author = match self.users.get_by_id(post.author_id).await {
            Ok(Some(author)) => author,
            Ok(None) => return,
            Err(e) => {
                warn!("Could not load author of post {}: {}", post.id, e);
                return;
            }
        };
        let url = format!("{}/post/{}", self.base_url, post.slug);
        if let Err(e) = email
            .send_comment_notification(
                &author.email,
                &post.title,
                &url,
                &comment.author_name,
                &comment.content,
                comment.approved,
            )
            .await
        {
            warn!("Comment notification for post {} failed: {}", post.id, e);
        }
    }

    pub async fn approve(&self, id: i64) -> Result<(), CommentServiceError> {
        if !self.repo.approve(id).await? {
            return Err(CommentServiceError::NotFound(id));
        }
        self.trigger_hook(hook_names::COMMENT_APPROVED, json!({ "id": id }));
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> Result<(), CommentServiceError> {
        if !self.repo.delete(id).await? {
            return Err(CommentServiceError::NotFound(id));
        }
        Ok(())
    }

    /// Public comments of a post, oldest first
    pub async fn list_approved_for_post(&self, post_id: i64) -> Result<Vec<CommentView>, CommentServiceError> {
        let comments = self.repo.list_approved_for_post(post_id).await?;
        Ok(comments.iter().map(CommentView::from).collect())
    }

    /// Moderation queue view, newest first
    pub async fn list_all(&self, params: &ListParams) -> Result<PagedResult<Comment>, CommentServiceError> {
        let (comments, total) = self.repo.list_all(params).await?;
        Ok(PagedResult::new(comments, total, params))
    }

    pub async fn count(&self) -> Result<i64, CommentServiceError> {
        Ok(self.repo.count().await?)
    }

    pub async fn count_pending(&self) -> Result<i64, CommentServiceError> {
        Ok(self.repo.count_pending().await?)
    }

    pub async fn count_since(&self, since: chrono::DateTime<Utc>) -> Result<i64, CommentServiceError> {
        Ok(self.repo.count_since(since).await?)
    }
}

fn anonymous_author(input: &CreateCommentInput) -> Result<(Option<i64>, String, String), CommentServiceError> {
    let name = input.author_name.as_deref().map(str::trim).unwrap_or_default();
    let email = input
        .author_email
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    if name.is_empty() || name.chars().count() > NAME_MAX_LENGTH {
        return Err(CommentServiceError::ValidationError(
            "Name is required".to_string(),
        ));
    }
    let email_ok = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !email_ok {
        return Err(CommentServiceError::ValidationError(
            "A valid email is required".to_string(),
        ));
    }
    Ok((None, name.to_string(), email.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{
        SqlxCommentRepository, SqlxPostRepository, SqlxSettingsRepository, SqlxUserRepository,
    };
    use crate::db::{create_test_pool, migrations};
    use crate::models::{Post, SettingType};
    use crate::services::email::testing::RecordingMailer;

    struct Fixture {
        service: CommentService,
        settings: Arc<SettingsService>,
        admin: User,
        reader: User,
        post: Post,
        draft: Post,
    }

    async fn setup() -> Fixture {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let users = SqlxUserRepository::boxed(pool.clone());
        let posts = SqlxPostRepository::boxed(pool.clone());
        let admin = users
            .create(&User::new("admin".into(), "admin@example.com".into(), "h".into(), true))
            .await
            .unwrap();
        let reader = users
            .create(&User::new("reader".into(), "reader@example.com".into(), "h".into(), false))
            .await
            .unwrap();

        let now = Utc::now();
        let mut post = Post {
            id: 0,
            title: "Hello".into(),
            slug: "hello".into(),
            content: "body".into(),
            excerpt: None,
            featured_image: None,
            published: true,
            likes: 0,
            author_id: admin.id,
            author_name: String::new(),
            created_at: now,
            updated_at: now,
        };
        let published = posts.create(&post).await.unwrap();
        post.slug = "draft".into();
        post.published = false;
        let draft = posts.create(&post).await.unwrap();

        let settings = Arc::new(SettingsService::new(SqlxSettingsRepository::boxed(pool.clone())));
        settings.init_defaults().await.unwrap();
        let service = CommentService::new(
            SqlxCommentRepository::boxed(pool),
            posts,
            users,
            settings.clone(),
        );
        Fixture {
            service,
            settings,
            admin,
            reader,
            post: published,
            draft,
        }
    }

    fn text(content: &str) -> CreateCommentInput {
        CreateCommentInput {
            content: content.to_string(),
            ..Default::default()
        }
    }

    fn anonymous(content: &str) -> CreateCommentInput {
        CreateCommentInput {
            content: content.to_string(),
            author_name: Some("Visitor".into()),
            author_email: Some("Visitor@Example.com".into()),
        }
    }

    #[tokio::test]
    async fn test_moderated_comment_hidden_until_approved() {
        let f = setup().await;
        let comment = f
            .service
            .create(f.post.id, Some(&f.reader), text("Nice post"))
            .await
            .unwrap();
        assert!(!comment.approved);
        assert!(f.service.list_approved_for_post(f.post.id).await.unwrap().is_empty());
        assert_eq!(f.service.count_pending().await.unwrap(), 1);

        f.service.approve(comment.id).await.unwrap();
        let visible = f.service.list_approved_for_post(f.post.id).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].author_name, "reader");
    }

    #[tokio::test]
    async fn test_admin_and_unmoderated_comments_auto_approve() {
        let f = setup().await;
        let by_admin = f
            .service
            .create(f.post.id, Some(&f.admin), text("Author reply"))
            .await
            .unwrap();
        assert!(by_admin.approved);

        f.settings
            .set_setting(keys::COMMENT_MODERATION, "false", SettingType::Bool)
            .await
            .unwrap();
        let by_visitor = f.service.create(f.post.id, None, anonymous("Hi")).await.unwrap();
        assert!(by_visitor.approved);
        assert_eq!(by_visitor.author_email, "visitor@example.com");
    }

    #[tokio::test]
    async fn test_validation() {
        let f = setup().await;
        assert!(matches!(
            f.service.create(f.post.id, Some(&f.reader), text("   ")).await,
            Err(CommentServiceError::ValidationError(_))
        ));
        let long = "x".repeat(CONTENT_MAX_LENGTH + 1);
        assert!(matches!(
            f.service.create(f.post.id, Some(&f.reader), text(&long)).await,
            Err(CommentServiceError::ValidationError(_))
        ));
        assert!(matches!(
            f.service.create(f.post.id, None, text("who am i")).await,
            Err(CommentServiceError::ValidationError(_))
        ));
        assert!(matches!(
            f.service.create(f.draft.id, Some(&f.reader), text("hidden")).await,
            Err(CommentServiceError::PostNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_disabled_comments() {
        let f = setup().await;
        f.settings
            .set_setting(keys::ENABLE_COMMENTS, "false", SettingType::Bool)
            .await
            .unwrap();
        assert!(matches!(
            f.service.create(f.post.id, Some(&f.reader), text("hi")).await,
            Err(CommentServiceError::Disabled)
        ));
    }

    #[tokio::test]
    async fn test_post_author_notified() {
        let f = setup().await;
        let mailer = Arc::new(RecordingMailer::default());
        let email = Arc::new(EmailService::with_mailer(mailer.clone(), None));
        let service = f.service.with_email(email, "http://localhost:8080");

        service.create(f.post.id, Some(&f.reader), text("Ping")).await.unwrap();
        service.create(f.post.id, Some(&f.admin), text("Own reply")).await.unwrap();

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "admin@example.com");
        assert!(sent[0].body.contains("http://localhost:8080/post/hello"));
    }

    #[tokio::test]
    async fn test_delete_and_missing() {
        let f = setup().await;
        let c = f.service.create(f.post.id, None, anonymous("bye")).await.unwrap();
        f.service.delete(c.id).await.unwrap();
        assert!(matches!(f.service.delete(c.id).await, Err(CommentServiceError::NotFound(_))));
        assert!(matches!(f.service.approve(c.id).await, Err(CommentServiceError::NotFound(_))));
        assert_eq!(f.service.count().await.unwrap(), 0);
        assert_eq!(
            f.service.list_all(&ListParams::default()).await.unwrap().total,
            0
        );
    }
}
