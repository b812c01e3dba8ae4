use async_trait::async_trait;
use common::MailConfig;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::debug;
use crate::error::{CycleError, CycleResult};

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Outbound mail seam. The poller and the credential alerts only see this trait.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> CycleResult<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig) -> anyhow::Result<Self> {
        let mut builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };
        builder = builder.port(config.smtp_port);

        if let (Some(user), Some(pass)) = (&config.smtp_user, &config.smtp_pass) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self { transport: builder.build() })
    }
}

fn build_message(mail: &OutgoingMail) -> CycleResult<Message> {
    let from: Mailbox = mail
        .from
        .parse()
        .map_err(|e| CycleError::Dispatch(format!("invalid sender {}: {}", mail.from, e)))?;

    let mut builder = Message::builder()
        .from(from)
        .subject(mail.subject.clone())
        .header(ContentType::TEXT_PLAIN);
    for rcpt in &mail.to {
        let mailbox: Mailbox = rcpt
            .parse()
            .map_err(|e| CycleError::Dispatch(format!("invalid recipient {}: {}", rcpt, e)))?;
        builder = builder.to(mailbox);
    }

    builder
        .body(mail.body.clone())
        .map_err(|e| CycleError::Dispatch(e.to_string()))
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> CycleResult<()> {
        let message = build_message(mail)?;
        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| CycleError::Dispatch(e.to_string()))?;
        debug!("SMTP accepted message: {:?}", response.code());
        Ok(())
    }
}
