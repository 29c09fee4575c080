//! Due-notice delivery

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, Message, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    SmtpTransport, Transport,
};
use std::str::FromStr;

use crate::{
    config::EmailConfig,
    error::{AppError, AppResult},
    models::DueSoonNotice,
};

/// Delivery channel for due-soon notices. The batch processor only depends
/// on this trait; a failed send aborts the current page before it is marked,
/// so delivery is at-least-once across retried runs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DueNotifier: Send + Sync {
    async fn send_due_notice(&self, notice: &DueSoonNotice) -> AppResult<()>;
}

/// Writes each notice to the log. The default transport; useful in
/// development and wherever delivery is handled by log shipping.
pub struct LogNotifier;

#[async_trait]
impl DueNotifier for LogNotifier {
    async fn send_due_notice(&self, notice: &DueSoonNotice) -> AppResult<()> {
        tracing::info!(
            member = %notice.member_email,
            title = %notice.book_title,
            due_at = %notice.due_at,
            "due-soon notice"
        );
        Ok(())
    }
}

/// Sends each notice as an email over SMTP.
#[derive(Clone)]
pub struct EmailNotifier {
    config: EmailConfig,
}

impl EmailNotifier {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> AppResult<()> {
        let from_name = self
            .config
            .smtp_from_name
            .as_deref()
            .unwrap_or("Biblis");
        let from_mailbox = Mailbox::from_str(&format!("{} <{}>", from_name, self.config.smtp_from))
            .map_err(|e| AppError::Email(format!("Invalid from address: {}", e)))?;

        let to_mailbox = Mailbox::from_str(to)
            .map_err(|e| AppError::Email(format!("Invalid to address: {}", e)))?;

        let email = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(body.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(format!(
                                r#"<html><body><pre>{}</pre></body></html>"#,
                                body.replace('\n', "<br>")
                            )),
                    ),
            )
            .map_err(|e| AppError::Email(format!("Failed to build email: {}", e)))?;

        let mailer_builder = if self.config.smtp_use_tls {
            // Use STARTTLS for secure connection
            SmtpTransport::starttls_relay(&self.config.smtp_host)
                .map_err(|e| AppError::Email(format!("Failed to create SMTP transport: {}", e)))?
        } else {
            SmtpTransport::builder_dangerous(&self.config.smtp_host)
        }
        .port(self.config.smtp_port);

        let mailer_builder = if let (Some(username), Some(password)) = (
            &self.config.smtp_username,
            &self.config.smtp_password,
        ) {
            mailer_builder.credentials(Credentials::new(
                username.clone(),
                password.clone(),
            ))
        } else {
            mailer_builder
        };

        let mailer = mailer_builder.build();

        mailer
            .send(&email)
            .map_err(|e| AppError::Email(format!("Failed to send email: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl DueNotifier for EmailNotifier {
    async fn send_due_notice(&self, notice: &DueSoonNotice) -> AppResult<()> {
        let subject = format!("Your loan of '{}' is due soon", notice.book_title);
        let body = format!(
            r#"
Hello,

your loan of '{title}' is due on {due}.

Please return it to your library, or come by to extend the loan.
"#,
            title = notice.book_title,
            due = notice.due_at.format("%Y-%m-%d"),
        );

        self.send_email(&notice.member_email, &subject, &body).await
    }
}
