//! Email notification on successful record updates.

use crate::config::NotifyConfig;
use crate::error::{DdnsError, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

const SUBJECT: &str = "DDNS Notification";

/// Receives a call for every record that was pointed at a new IP.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, domain: &str, ip: &str) -> Result<()>;
}

/// Sends notifications over SMTP.
pub struct SmtpNotifier {
    config: NotifyConfig,
}

impl SmtpNotifier {
    pub fn new(config: NotifyConfig) -> Self {
        Self { config }
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let server = self.config.smtp_server.as_str();
        let builder = if self.config.smtp_port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(server)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(server)
        }
        .map_err(|e| DdnsError::Notification(format!("SMTP relay {}: {}", server, e)))?;

        Ok(builder
            .port(self.config.smtp_port)
            .credentials(Credentials::new(
                self.config.smtp_username.clone(),
                self.config.smtp_password.clone(),
            ))
            .build())
    }

    fn message(&self, domain: &str, ip: &str) -> Result<Message> {
        let from: Mailbox = self
            .config
            .smtp_username
            .parse()
            .map_err(|e| DdnsError::Notification(format!("invalid sender address: {}", e)))?;
        let to: Mailbox = self
            .config
            .send_to
            .parse()
            .map_err(|e| DdnsError::Notification(format!("invalid recipient address: {}", e)))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(SUBJECT)
            .header(ContentType::TEXT_HTML)
            .body(render_body(domain, ip))
            .map_err(|e| DdnsError::Notification(e.to_string()))
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, domain: &str, ip: &str) -> Result<()> {
        tracing::info!(domain, ip, "Sending notification to {}", self.config.send_to);

        let message = self.message(domain, ip)?;
        self.transport()?
            .send(message)
            .await
            .map_err(|e| DdnsError::Notification(e.to_string()))?;

        Ok(())
    }
}

/// HTML body of the notification mail.
pub fn render_body(domain: &str, ip: &str) -> String {
    format!(
        r#"<html>
<body>
  <h2>DNS record updated</h2>
  <p>Your IP address has changed. <strong>{domain}</strong> now points to <strong>{ip}</strong>.</p>
  <p style="color:#888">Sent by ddns-warden at {time}</p>
</body>
</html>
"#,
        domain = escape_html(domain),
        ip = escape_html(ip),
        time = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
    )
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
