//! Email delivery for password reset and verification messages.

use lettre::{
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use std::path::Path;
use std::time::Duration;

use crate::{
    config::{Config, EmailTransportConfig},
    errors::Error,
};

/// Sends a rendered message to one recipient.
///
/// Handlers depend on this trait rather than on [`EmailService`] so that delivery can be swapped
/// out in tests.
#[async_trait::async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to_email: &str, to_name: Option<&str>, email: &Email) -> Result<(), Error>;
}

/// A rendered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub subject: String,
    /// HTML body
    pub body: String,
}

pub fn password_reset_link(public_url: &str, token: &str) -> String {
    format!("{}/api/v1/auth/reset-password/{token}", public_url.trim_end_matches('/'))
}

pub fn email_verification_link(public_url: &str, token: &str) -> String {
    format!("{}/api/v1/auth/verify-email/{token}", public_url.trim_end_matches('/'))
}

fn greeting(to_name: Option<&str>) -> String {
    match to_name {
        Some(name) => format!("Hello {name},"),
        None => "Hello,".to_string(),
    }
}

fn humanize(duration: Duration) -> String {
    let minutes = duration.as_secs() / 60;
    match minutes {
        0..=1 => "1 minute".to_string(),
        2..=119 => format!("{minutes} minutes"),
        _ => format!("{} hours", minutes / 60),
    }
}

fn layout(title: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>{title}</title>
    <style>
        body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
        .container {{ max-width: 600px; margin: 0 auto; padding: 20px; }}
        .footer {{ margin-top: 30px; font-size: 12px; color: #666; }}
    </style>
</head>
<body>
    <div class="container">
        <h2>{title}</h2>
{content}
        <div class="footer">
            <p>This is an automated message, please do not reply to this email.</p>
        </div>
    </div>
</body>
</html>"#
    )
}

impl Email {
    pub fn password_reset(to_name: Option<&str>, link: &str, valid_for: Duration) -> Self {
        let greeting = greeting(to_name);
        let valid_for = humanize(valid_for);
        let content = format!(
            r#"        <p>{greeting}</p>

        <p>We received a request to reset your password. If you didn't make this request, you can safely ignore this email.</p>

        <p>Submit your new password and its confirmation with a PATCH request to:</p>
        <p><a href="{link}">{link}</a></p>

        <p>This link will expire in {valid_for} for security reasons.</p>
"#
        );

        Self {
            subject: format!("Your password reset token (valid for {valid_for})"),
            body: layout("Password Reset Request", &content),
        }
    }

    pub fn verification(to_name: Option<&str>, link: &str) -> Self {
        let greeting = greeting(to_name);
        let content = format!(
            r#"        <p>{greeting}</p>

        <p>Welcome to HackMatch! Please confirm your email address by opening the link below:</p>
        <p><a href="{link}">{link}</a></p>

        <p>If you didn't create an account, you can safely ignore this email.</p>
"#
        );

        Self {
            subject: "Verify your email address".to_string(),
            body: layout("Verify your email address", &content),
        }
    }
}

pub struct EmailService {
    transport: EmailTransport,
    from_email: String,
    from_name: String,
    reply_to: Option<String>,
}

enum EmailTransport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

impl EmailService {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let email_config = &config.email;

        let transport = match &email_config.transport {
            EmailTransportConfig::Smtp {
                host,
                port,
                username,
                password,
                use_tls,
            } => {
                if !use_tls {
                    tracing::warn!("SMTP TLS is disabled - this is not recommended for production");
                }

                let smtp_builder = if *use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                } else {
                    Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host))
                }
                .map_err(|e| Error::Internal {
                    operation: format!("create SMTP transport: {e}"),
                })?
                .port(*port)
                .credentials(Credentials::new(username.clone(), password.clone()));

                EmailTransport::Smtp(smtp_builder.build())
            }
            EmailTransportConfig::File { path } => {
                // Use file transport for development/testing
                let emails_dir = Path::new(path);
                if !emails_dir.exists() {
                    std::fs::create_dir_all(emails_dir).map_err(|e| Error::Internal {
                        operation: format!("create emails directory: {e}"),
                    })?;
                }
                EmailTransport::File(AsyncFileTransport::<Tokio1Executor>::new(emails_dir))
            }
        };

        Ok(Self {
            transport,
            from_email: email_config.from_email.clone(),
            from_name: email_config.from_name.clone(),
            reply_to: email_config.reply_to.clone(),
        })
    }

    fn build_message(&self, to_email: &str, to_name: Option<&str>, email: &Email) -> Result<Message, Error> {
        let from = format!("{} <{}>", self.from_name, self.from_email)
            .parse::<Mailbox>()
            .map_err(|e| Error::Internal {
                operation: format!("parse from email: {e}"),
            })?;

        let to = match to_name {
            Some(name) => format!("{name} <{to_email}>"),
            None => to_email.to_string(),
        }
        .parse::<Mailbox>()
        .map_err(|e| Error::Internal {
            operation: format!("parse to email: {e}"),
        })?;

        let mut builder = Message::builder().from(from).to(to).subject(email.subject.clone());
        if let Some(reply_to) = &self.reply_to {
            let reply_to = reply_to.parse::<Mailbox>().map_err(|e| Error::Internal {
                operation: format!("parse reply-to email: {e}"),
            })?;
            builder = builder.reply_to(reply_to);
        }

        builder
            .header(ContentType::TEXT_HTML)
            .body(email.body.clone())
            .map_err(|e| Error::Internal {
                operation: format!("build email message: {e}"),
            })
    }
}

#[async_trait::async_trait]
impl EmailSender for EmailService {
    #[tracing::instrument(skip_all, fields(subject = %email.subject), err)]
    async fn send(&self, to_email: &str, to_name: Option<&str>, email: &Email) -> Result<(), Error> {
        let message = self.build_message(to_email, to_name, email)?;

        match &self.transport {
            EmailTransport::Smtp(smtp) => {
                smtp.send(message).await.map_err(|e| Error::EmailDelivery {
                    reason: format!("SMTP: {e}"),
                })?;
            }
            EmailTransport::File(file) => {
                file.send(message).await.map_err(|e| Error::EmailDelivery {
                    reason: format!("file transport: {e}"),
                })?;
            }
        }

        tracing::debug!("Email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_config(path: &Path) -> Config {
        let mut config = Config::default();
        config.email.transport = EmailTransportConfig::File {
            path: path.to_string_lossy().to_string(),
        };
        config
    }

    #[test]
    fn test_links() {
        assert_eq!(
            password_reset_link("https://hackmatch.dev/", "abc"),
            "https://hackmatch.dev/api/v1/auth/reset-password/abc"
        );
        assert_eq!(
            email_verification_link("http://localhost:5000", "xyz"),
            "http://localhost:5000/api/v1/auth/verify-email/xyz"
        );
    }

    #[test]
    fn test_password_reset_email_body() {
        let email = Email::password_reset(Some("Alice"), "http://localhost:5000/api/v1/auth/reset-password/abc", Duration::from_secs(600));

        assert_eq!(email.subject, "Your password reset token (valid for 10 minutes)");
        assert!(email.body.contains("Hello Alice,"));
        assert!(email.body.contains("http://localhost:5000/api/v1/auth/reset-password/abc"));
        assert!(email.body.contains("expire in 10 minutes"));
    }

    #[test]
    fn test_verification_email_body() {
        let email = Email::verification(None, "http://localhost:5000/api/v1/auth/verify-email/xyz");
        assert!(email.body.contains("Hello,"));
        assert!(email.body.contains("/verify-email/xyz"));
    }

    #[test]
    fn test_humanize() {
        assert_eq!(humanize(Duration::from_secs(600)), "10 minutes");
        assert_eq!(humanize(Duration::from_secs(24 * 3600)), "24 hours");
        assert_eq!(humanize(Duration::from_secs(30)), "1 minute");
    }

    #[tokio::test]
    async fn test_file_transport_writes_message() {
        let dir = tempfile::tempdir().unwrap();
        let service = EmailService::new(&file_config(dir.path())).unwrap();

        let email = Email::verification(Some("Alice"), "http://localhost:5000/api/v1/auth/verify-email/xyz");
        service.send("alice@x.com", Some("Alice"), &email).await.unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        let contents = std::fs::read_to_string(files[0].as_ref().unwrap().path()).unwrap();
        assert!(contents.contains("Subject: Verify your email address"));
        assert!(contents.contains("alice@x.com"));
    }

    #[tokio::test]
    async fn test_file_transport_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested").join("emails");
        assert!(EmailService::new(&file_config(&nested)).is_ok());
        assert!(nested.exists());
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_internal() {
        let dir = tempfile::tempdir().unwrap();
        let service = EmailService::new(&file_config(dir.path())).unwrap();
        let email = Email::verification(None, "http://x");

        let err = service.send("not an address", None, &email).await.unwrap_err();
        assert!(matches!(err, Error::Internal { .. }));
    }
}
