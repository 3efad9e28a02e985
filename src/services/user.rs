//! User service
//!
//! Registration, login sessions, admin management and password resets.
//! Registration is open only until the first account exists; that account
//! becomes the administrator. Further accounts come from the CLI.

use anyhow::Context;
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::SecurityConfig;
use crate::db::repositories::{SessionRepository, UserRepository};
use crate::models::{CreateUserInput, ListParams, PagedResult, Session, User};
use crate::plugin::{hook_names, HookManager};
use crate::services::password::{check_password_strength, hash_password, verify_password};
use crate::services::security::{TokenError, TokenSigner};

#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("User already exists: {0}")]
    UserExists(String),

    #[error("Registration is closed")]
    RegistrationClosed,

    #[error("User not found")]
    UserNotFound,

    #[error("Session expired")]
    SessionExpired,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct UserService {
    user_repo: Arc<dyn UserRepository>,
    session_repo: Arc<dyn SessionRepository>,
    security: SecurityConfig,
    signer: TokenSigner,
    hooks: Option<Arc<HookManager>>,
}

impl UserService {
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        session_repo: Arc<dyn SessionRepository>,
        security: SecurityConfig,
        signer: TokenSigner,
    ) -> Self {
        Self {
            user_repo,
            session_repo,
            security,
            signer,
            hooks: None,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<HookManager>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Register the site's first account. It is made an administrator.
    pub async fn register(&self, input: CreateUserInput) -> Result<User, UserServiceError> {
        if self.user_repo.count().await? > 0 {
            return Err(UserServiceError::RegistrationClosed);
        }
        let user = self.create_user(input, true).await?;
        if let Some(hooks) = &self.hooks {
            hooks.trigger(
                hook_names::USER_REGISTERED,
                json!({ "id": user.id, "username": user.username }),
            );
        }
        Ok(user)
    }

    /// Create an administrator regardless of how many users exist
    pub async fn create_admin(&self, input: CreateUserInput) -> Result<User, UserServiceError> {
        self.create_user(input, true).await
    }

    async fn create_user(
        &self,
        input: CreateUserInput,
        is_admin: bool,
    ) -> Result<User, UserServiceError> {
        let username = input.username.trim().to_string();
        let email = input.email.trim().to_lowercase();
        validate_username(&username)?;
        validate_email(&email)?;
        check_password_strength(
            &input.password,
            self.security.password_min_length,
            self.security.require_password_complexity,
        )
        .map_err(UserServiceError::ValidationError)?;

        if self
            .user_repo
            .get_by_username(&username)
            .await
            .context("Failed to check username")?
            .is_some()
        {
            return Err(UserServiceError::UserExists(format!(
                "Username '{}' is already taken",
                username
            )));
        }
        if self
            .user_repo
            .get_by_email(&email)
            .await
            .context("Failed to check email")?
            .is_some()
        {
            return Err(UserServiceError::UserExists(format!(
                "Email '{}' is already registered",
                email
            )));
        }

        let password_hash = hash_password(&input.password)?;
        let user = self
            .user_repo
            .create(&User::new(username, email, password_hash, is_admin))
            .await
            .context("Failed to create user")?;
        info!("Created user '{}' (admin: {})", user.username, user.is_admin);
        Ok(user)
    }

    /// Check credentials and open a session. `login` is an email or a username.
    pub async fn login(&self, login: &str, password: &str) -> Result<(User, Session), UserServiceError> {
        let login = login.trim();
        let user = if login.contains('@') {
            self.user_repo.get_by_email(&login.to_lowercase()).await?
        } else {
            self.user_repo.get_by_username(login).await?
        };

        let user = match user {
            Some(user) if verify_password(password, &user.password_hash)? => user,
            _ => {
                warn!("Failed login for '{}'", login);
                return Err(UserServiceError::AuthenticationError(
                    "Invalid credentials".to_string(),
                ));
            }
        };

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: user.id,
            expires_at: now + Duration::hours(self.security.session_hours),
            created_at: now,
        };
        let session = self
            .session_repo
            .create(&session)
            .await
            .context("Failed to create session")?;
        Ok((user, session))
    }

    pub async fn logout(&self, session_id: &str) -> Result<(), UserServiceError> {
        self.session_repo.delete(session_id).await?;
        Ok(())
    }

    /// Resolve a session token to its user, deleting it when expired
    pub async fn validate_session(&self, session_id: &str) -> Result<User, UserServiceError> {
        let session = self
            .session_repo
            .get_by_id(session_id)
            .await?
            .ok_or(UserServiceError::SessionNotFound)?;

        if session.is_expired() {
            self.session_repo.delete(session_id).await?;
            return Err(UserServiceError::SessionExpired);
        }

        self.user_repo
            .get_by_id(session.user_id)
            .await?
            .ok_or(UserServiceError::UserNotFound)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, UserServiceError> {
        Ok(self.user_repo.get_by_id(id).await?)
    }

    pub async fn list(&self, params: &ListParams) -> Result<PagedResult<User>, UserServiceError> {
        let (users, total) = self.user_repo.list(params).await?;
        Ok(PagedResult::new(users, total, params))
    }

    pub async fn count(&self) -> Result<i64, UserServiceError> {
        Ok(self.user_repo.count().await?)
    }

    /// Flip `target`'s admin flag. Admins cannot change their own flag.
    pub async fn toggle_admin(&self, actor: &User, target_id: i64) -> Result<User, UserServiceError> {
        if actor.id == target_id {
            return Err(UserServiceError::Forbidden(
                "You cannot change your own admin status".to_string(),
            ));
        }
        let mut target = self
            .user_repo
            .get_by_id(target_id)
            .await?
            .ok_or(UserServiceError::UserNotFound)?;
        target.is_admin = !target.is_admin;
        target.updated_at = Utc::now();
        let target = self.user_repo.update(&target).await?;
        info!(
            "{} set admin={} for '{}'",
            actor.username, target.is_admin, target.username
        );
        Ok(target)
    }

    pub async fn admin_emails(&self) -> Result<Vec<String>, UserServiceError> {
        Ok(self.user_repo.admin_emails().await?)
    }

    pub async fn cleanup_expired_sessions(&self) -> Result<u64, UserServiceError> {
        let removed = self.session_repo.delete_expired().await?;
        if removed > 0 {
            info!("Removed {} expired sessions", removed);
        }
        Ok(removed)
    }

    /// Reset token for the account with `email`, if one exists
    pub async fn generate_reset_token(
        &self,
        email: &str,
    ) -> Result<Option<(User, String)>, UserServiceError> {
        let user = self
            .user_repo
            .get_by_email(&email.trim().to_lowercase())
            .await?;
        Ok(user.map(|u| {
            let token = self.signer.reset_token(u.id, Utc::now());
            (u, token)
        }))
    }

    /// Set a new password from a reset token; all sessions of the user end
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<User, UserServiceError> {
        let user_id = self
            .signer
            .verify_reset_token(token, Utc::now())
            .map_err(|e: TokenError| {
                warn!("Rejected reset token: {}", e);
                UserServiceError::InvalidToken
            })?;
        check_password_strength(
            new_password,
            self.security.password_min_length,
            self.security.require_password_complexity,
        )
        .map_err(UserServiceError::ValidationError)?;

        let mut user = self
            .user_repo
            .get_by_id(user_id)
            .await?
            .ok_or(UserServiceError::InvalidToken)?;
        user.password_hash = hash_password(new_password)?;
        user.updated_at = Utc::now();
        let user = self.user_repo.update(&user).await?;
        self.session_repo.delete_by_user(user.id).await?;
        info!("Password reset for '{}'", user.username);
        Ok(user)
    }
}

fn validate_username(username: &str) -> Result<(), UserServiceError> {
    let len = username.chars().count();
    if !(3..=50).contains(&len) {
        return Err(UserServiceError::ValidationError(
            "Username must be between 3 and 50 characters".to_string(),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    {
        return Err(UserServiceError::ValidationError(
            "Username may only contain letters, numbers, '_' and '-'".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_email(email: &str) -> Result<(), UserServiceError> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    };
    if valid && email.len() <= 120 {
        Ok(())
    } else {
        Err(UserServiceError::ValidationError("Invalid email address".to_string()))
    }
}
