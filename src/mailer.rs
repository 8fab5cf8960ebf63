use anyhow::Context;
use axum::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::MailConfig;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification_code(&self, to: &str, code: i32) -> anyhow::Result<()>;
}

/// Builds the mailer described by config: HTTP delivery when an API URL is set, logging otherwise.
pub fn from_config(cfg: &MailConfig) -> anyhow::Result<Box<dyn Mailer>> {
    Ok(match &cfg.api_url {
        Some(url) => Box::new(HttpMailer::new(url, &cfg.api_key, &cfg.from)?),
        None => Box::new(LogMailer),
    })
}

#[derive(Debug, Serialize)]
struct OutgoingMail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: String,
}

/// Sends mail through a transactional mail API that accepts a JSON message and a bearer key.
pub struct HttpMailer {
    client: reqwest::Client,
    url: String,
    api_key: String,
    from: String,
}

impl HttpMailer {
    pub fn new(url: &str, api_key: &str, from: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("build mail http client")?;
        Ok(Self {
            client,
            url: url.to_string(),
            api_key: api_key.to_string(),
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send_verification_code(&self, to: &str, code: i32) -> anyhow::Result<()> {
        let mail = OutgoingMail {
            from: &self.from,
            to: [to],
            subject: "Your Verification Code",
            html: verification_html(code),
        };
        self.client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&mail)
            .send()
            .await
            .context("send verification mail")?
            .error_for_status()
            .context("mail api rejected verification mail")?;
        debug!(to, "verification mail accepted");
        Ok(())
    }
}

/// Development mailer: writes the code to the log instead of delivering it.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_verification_code(&self, to: &str, code: i32) -> anyhow::Result<()> {
        info!(to, code, "verification code (mail delivery disabled)");
        Ok(())
    }
}

fn verification_html(code: i32) -> String {
    format!(
        r#"<div style="font-family: Arial, sans-serif; line-height: 1.6;">
  <h3>Your Verification Code</h3>
  <p>Enter this code to confirm your email address:</p>
  <h2 style="letter-spacing: 4px;">{code}</h2>
  <p>If you did not create an account you can ignore this message.</p>
</div>"#
    )
}
