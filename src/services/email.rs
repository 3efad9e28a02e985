//! Outgoing email
//!
//! Messages are composed here and handed to a [`Mailer`]. The SMTP mailer
//! uses lettre's async transport. Without SMTP credentials every send is
//! skipped with a log line.

use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::MailConfig;
use crate::models::Post;
use crate::theme::TemplateGlobals;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("Invalid address '{0}'")]
    InvalidAddress(String),

    #[error("Failed to build email: {0}")]
    Build(String),

    #[error("Failed to send email: {0}")]
    Transport(String),

    #[error("No recipient configured")]
    NoRecipient,
}

/// A composed plain-text message
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), EmailError>;
}

pub struct SmtpMailer {
    config: MailConfig,
}

impl SmtpMailer {
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, EmailError> {
        let builder = if self.config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)
                .map_err(|e| EmailError::Transport(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.config.host)
        };
        let creds = Credentials::new(
            self.config.username.clone().unwrap_or_default(),
            self.config.password.clone().unwrap_or_default(),
        );
        Ok(builder.credentials(creds).port(self.config.port).build())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), EmailError> {
        let from = self.config.sender().unwrap_or_default();
        let message = Message::builder()
            .from(from.parse().map_err(|_| EmailError::InvalidAddress(from.to_string()))?)
            .to(mail
                .to
                .parse()
                .map_err(|_| EmailError::InvalidAddress(mail.to.clone()))?)
            .subject(mail.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body.clone())
            .map_err(|e| EmailError::Build(e.to_string()))?;

        self.transport()?
            .send(message)
            .await
            .map_err(|e| EmailError::Transport(e.to_string()))?;
        Ok(())
    }
}

pub struct EmailService {
    mailer: Option<Arc<dyn Mailer>>,
    admin_email: Option<String>,
    globals: Option<Arc<TemplateGlobals>>,
}

impl EmailService {
    /// SMTP-backed service; disabled when the config has no credentials
    pub fn new(config: &MailConfig) -> Self {
        let mailer: Option<Arc<dyn Mailer>> = if config.is_configured() {
            Some(Arc::new(SmtpMailer::new(config.clone())))
        } else {
            None
        };
        Self {
            mailer,
            admin_email: config.admin_email.clone(),
            globals: None,
        }
    }

    pub fn with_mailer(mailer: Arc<dyn Mailer>, admin_email: Option<String>) -> Self {
        Self {
            mailer: Some(mailer),
            admin_email,
            globals: None,
        }
    }

    /// Read the site title for subjects from the settings snapshot
    pub fn with_globals(mut self, globals: Arc<TemplateGlobals>) -> Self {
        self.globals = Some(globals);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.mailer.is_some()
    }

    fn site_title(&self) -> String {
        self.globals
            .as_ref()
            .map(|g| g.setting_str("site_title", "Webbly Site"))
            .unwrap_or_else(|| "Webbly Site".to_string())
    }

    /// Send, or skip when mail is off. Returns whether a message went out.
    async fn deliver(&self, mail: OutgoingMail) -> Result<bool, EmailError> {
        match &self.mailer {
            Some(mailer) => {
                mailer.send(&mail).await?;
                debug!("Sent '{}' to {}", mail.subject, mail.to);
                Ok(true)
            }
            None => {
                info!("Mail not configured; skipping '{}' to {}", mail.subject, mail.to);
                Ok(false)
            }
        }
    }

    pub async fn send_password_reset(
        &self,
        to: &str,
        username: &str,
        reset_url: &str,
    ) -> Result<bool, EmailError> {
        let site = self.site_title();
        self.deliver(OutgoingMail {
            to: to.to_string(),
            subject: format!("[{}] Password reset", site),
            body: format!(
                "Hello {},\n\nA password reset was requested for your account.\n\
                 Open this link within one hour to choose a new password:\n\n{}\n\n\
                 If you did not ask for this, ignore this message.\n\n{}",
                username, reset_url, site
            ),
        })
        .await
    }

    pub async fn send_comment_notification(
        &self,
        to: &str,
        post_title: &str,
        post_url: &str,
        commenter: &str,
        content: &str,
        approved: bool,
    ) -> Result<bool, EmailError> {
        let site = self.site_title();
        let status = if approved {
            "It is visible on the site."
        } else {
            "It is waiting for moderation."
        };
        self.deliver(OutgoingMail {
            to: to.to_string(),
            subject: format!("[{}] New comment on \"{}\"", site, post_title),
            body: format!(
                "{} commented on \"{}\":\n\n{}\n\n{}\n{}",
                commenter, post_title, content, status, post_url
            ),
        })
        .await
    }

    pub async fn send_welcome(&self, to: &str, username: &str) -> Result<bool, EmailError> {
        let site = self.site_title();
        self.deliver(OutgoingMail {
            to: to.to_string(),
            subject: format!("Welcome to {}", site),
            body: format!("Hello {},\n\nYour account on {} is ready.", username, site),
        })
        .await
    }

    /// Forward a contact form submission to the configured admin address
    pub async fn send_contact(
        &self,
        name: &str,
        email: &str,
        message: &str,
    ) -> Result<bool, EmailError> {
        let to = self.admin_email.clone().ok_or(EmailError::NoRecipient)?;
        let site = self.site_title();
        self.deliver(OutgoingMail {
            to,
            subject: format!("[{}] Contact form: {}", site, name),
            body: format!("From: {} <{}>\n\n{}", name, email, message),
        })
        .await
    }

    pub async fn send_digest(
        &self,
        to: &str,
        posts: &[Post],
        base_url: &str,
    ) -> Result<bool, EmailError> {
        if posts.is_empty() {
            return Ok(false);
        }
        let site = self.site_title();
        let lines: Vec<String> = posts
            .iter()
            .map(|p| format!("- {}\n  {}/post/{}", p.title, base_url.trim_end_matches('/'), p.slug))
            .collect();
        self.deliver(OutgoingMail {
            to: to.to_string(),
            subject: format!("[{}] Daily digest", site),
            body: format!("New on {} today:\n\n{}", site, lines.join("\n")),
        })
        .await
    }
}
