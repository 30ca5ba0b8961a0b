//! Mail delivery: the `mail` adapter and the transports behind it.

use crate::core::config::{Config, DeliveryMethod, SmtpConfig};
use crate::core::error::BackroomError;
use crate::core::store::Record;
use crate::hooks::adapter::{Adapter, DeliveryError};
use crate::hooks::rule::{Action, HookRule};
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Address, Message, SmtpTransport, Transport};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub const SENDGRID_ENDPOINT: &str = "https://api.sendgrid.com/v3/mail/send";
const SENDGRID_TIMEOUT_SECS: u64 = 15;

/// A rendered notification, independent of how it is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from: Mailbox,
    pub to: Mailbox,
    pub subject: String,
    pub body: String,
}

impl OutgoingMail {
    pub fn render(from: &Mailbox, to: &str, action: Action, record: &Record) -> Result<Self, DeliveryError> {
        let to: Mailbox = to
            .parse()
            .map_err(|e| DeliveryError::Message(format!("recipient '{}': {}", to, e)))?;
        let data = serde_json::to_string_pretty(&record.data)
            .map_err(|e| DeliveryError::Message(e.to_string()))?;
        Ok(OutgoingMail {
            from: from.clone(),
            to,
            subject: format!("{}: record {}d", record.cage, action),
            body: format!("{} record {} {}d\n\n{}\n", record.cage, record.id, action, data),
        })
    }
}

pub trait MailTransport: Send + Sync {
    fn name(&self) -> &'static str;
    fn send(&self, mail: &OutgoingMail) -> Result<(), DeliveryError>;
}

/// Builds the sender mailbox from `mail.from_name`/`app_name` and the
/// configured from address. The display name is taken verbatim, so names
/// with commas or quotes are fine.
pub fn sender(config: &Config) -> Result<Mailbox, BackroomError> {
    let address = config.mail_from_address();
    let address: Address = address.parse().map_err(|e| {
        BackroomError::ConfigError(format!("mail sender address '{}': {}", address, e))
    })?;
    Ok(Mailbox::new(Some(config.mail_from_name().to_string()), address))
}

/// Sends one plain-text message per delivery to the rule's target address.
pub struct MailAdapter {
    from: Mailbox,
    transport: Arc<dyn MailTransport>,
}

impl MailAdapter {
    pub fn new(from: Mailbox, transport: Arc<dyn MailTransport>) -> Self {
        Self { from, transport }
    }
}

impl Adapter for MailAdapter {
    fn check_target(&self, target: &str) -> Result<(), String> {
        target
            .parse::<Mailbox>()
            .map(|_| ())
            .map_err(|e| format!("target '{}' is not a mail address: {}", target, e))
    }

    fn deliver(&self, rule: &HookRule, action: Action, record: &Record) -> Result<(), DeliveryError> {
        let mail = OutgoingMail::render(&self.from, &rule.target, action, record)?;
        self.transport.send(&mail)?;
        tracing::debug!(
            transport = self.transport.name(),
            to = %mail.to,
            record_id = %record.id,
            "hook mail sent"
        );
        Ok(())
    }
}

/// Builds the transport for a configured delivery method.
pub fn transport_for(
    method: DeliveryMethod,
    config: &Config,
) -> Result<Arc<dyn MailTransport>, BackroomError> {
    Ok(match method {
        DeliveryMethod::Smtp => Arc::new(SmtpMailTransport::from_config(&config.mail.smtp)?),
        DeliveryMethod::Sendgrid => Arc::new(SendGridTransport::new(&config.mail.sendgrid.api_key)),
        DeliveryMethod::LogOnly => Arc::new(LogOnlyTransport),
    })
}

pub struct SmtpMailTransport {
    transport: SmtpTransport,
}

impl SmtpMailTransport {
    pub fn from_config(smtp: &SmtpConfig) -> Result<Self, BackroomError> {
        let host = smtp.host.trim();
        if host.is_empty() {
            return Err(BackroomError::ConfigError("mail.smtp.host is required".to_string()));
        }
        let smtp_err = |e: lettre::transport::smtp::Error| {
            BackroomError::ConfigError(format!("mail.smtp ({}): {}", host, e))
        };

        let mut builder = if smtp.tls {
            let params = TlsParameters::builder(host.to_string())
                .dangerous_accept_invalid_certs(smtp.skip_verify)
                .build()
                .map_err(smtp_err)?;
            SmtpTransport::relay(host).map_err(smtp_err)?.tls(Tls::Wrapper(params))
        } else {
            SmtpTransport::builder_dangerous(host)
        };
        if let Some(port) = smtp.port {
            builder = builder.port(port);
        }
        if !smtp.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                smtp.username.clone(),
                smtp.password.clone(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
        })
    }
}

impl MailTransport for SmtpMailTransport {
    fn name(&self) -> &'static str {
        DeliveryMethod::Smtp.as_str()
    }

    fn send(&self, mail: &OutgoingMail) -> Result<(), DeliveryError> {
        let message = Message::builder()
            .from(mail.from.clone())
            .to(mail.to.clone())
            .subject(mail.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body.clone())
            .map_err(|e| DeliveryError::Message(e.to_string()))?;
        self.transport
            .send(&message)
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        Ok(())
    }
}

pub struct SendGridTransport {
    api_key: String,
    endpoint: String,
    agent: ureq::Agent,
}

impl SendGridTransport {
    pub fn new(api_key: &str) -> Self {
        Self::with_endpoint(api_key, SENDGRID_ENDPOINT)
    }

    pub fn with_endpoint(api_key: &str, endpoint: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            endpoint: endpoint.to_string(),
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(SENDGRID_TIMEOUT_SECS))
                .build(),
        }
    }

    fn payload(mail: &OutgoingMail) -> serde_json::Value {
        let mut from = json!({ "email": mail.from.email.to_string() });
        if let Some(name) = &mail.from.name {
            from["name"] = json!(name);
        }
        json!({
            "personalizations": [{ "to": [{ "email": mail.to.email.to_string() }] }],
            "from": from,
            "subject": mail.subject,
            "content": [{ "type": "text/plain", "value": mail.body }],
        })
    }
}

impl MailTransport for SendGridTransport {
    fn name(&self) -> &'static str {
        DeliveryMethod::Sendgrid.as_str()
    }

    fn send(&self, mail: &OutgoingMail) -> Result<(), DeliveryError> {
        let result = self
            .agent
            .post(&self.endpoint)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(Self::payload(mail));
        match result {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(code, response)) => {
                let detail = response.into_string().unwrap_or_default();
                Err(DeliveryError::Transport(format!(
                    "sendgrid responded {}: {}",
                    code,
                    detail.trim()
                )))
            }
            Err(e) => Err(DeliveryError::Transport(e.to_string())),
        }
    }
}

/// Records mail in the log instead of sending it.
pub struct LogOnlyTransport;

impl MailTransport for LogOnlyTransport {
    fn name(&self) -> &'static str {
        DeliveryMethod::LogOnly.as_str()
    }

    fn send(&self, mail: &OutgoingMail) -> Result<(), DeliveryError> {
        tracing::info!(
            target: "backroom::mail",
            from = %mail.from,
            to = %mail.to,
            subject = %mail.subject,
            "{}",
            mail.body
        );
        Ok(())
    }
}
