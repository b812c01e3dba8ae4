use serde::{Deserialize, Serialize};
use std::fs;
use anyhow::{bail, Context, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    pub mail: MailConfig,
    #[serde(default)]
    pub ipc: IpcConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_events_url")]
    pub events_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Sort order passed upstream; the watermark relies on it being descending by id.
    #[serde(default = "default_sort")]
    pub sort: String,
    #[serde(default = "default_profile_url")]
    pub profile_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_baseline_path")]
    pub baseline_path: String,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            baseline_path: default_baseline_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_user: Option<String>,
    #[serde(default)]
    pub smtp_pass: Option<String>,
    #[serde(default = "default_starttls")]
    pub starttls: bool,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: String,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self { socket_path: default_socket_path() }
    }
}

fn default_token_url() -> String { "https://api.intra.42.fr/oauth/token".to_string() }
fn default_events_url() -> String { "https://api.intra.42.fr/v2/campus/1/events/".to_string() }
fn default_sort() -> String { "-id".to_string() }
fn default_profile_url() -> String { "https://profile.intra.42.fr/events/".to_string() }
fn default_timeout_secs() -> u64 { 30 }
fn default_interval_secs() -> u64 { 300 }
fn default_baseline_path() -> String { "last_result.json".to_string() }
fn default_smtp_port() -> u16 { 587 }
fn default_starttls() -> bool { true }
fn default_socket_path() -> String { "/run/evwatch/evwatch.sock".to_string() }

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config")?;
        Ok(config)
    }

    pub fn default_path() -> String {
        std::env::var("EVWATCH_CONFIG")
            .unwrap_or_else(|_| "./config/default.toml".to_string())
    }

    /// Overlay deployment secrets from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CLIENT_ID") {
            self.api.client_id = v;
        }
        if let Some(v) = lookup("CLIENT_SECRET") {
            self.api.client_secret = v;
        }
        if let Some(v) = lookup("SMTP_HOST") {
            self.mail.smtp_host = v;
        }
        if let Some(port) = lookup("SMTP_PORT").and_then(|v| v.trim().parse().ok()) {
            self.mail.smtp_port = port;
        }
        if let Some(v) = lookup("SMTP_USER") {
            self.mail.smtp_user = Some(v);
        }
        if let Some(v) = lookup("SMTP_PASS") {
            self.mail.smtp_pass = Some(v);
        }
        if let Some(v) = lookup("RECIPIENT_EMAILS") {
            self.mail.recipients = parse_recipients(&v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.client_id.is_empty() || self.api.client_secret.is_empty() {
            bail!("api.client_id and api.client_secret must be set");
        }
        if self.poller.interval_secs == 0 {
            bail!("poller.interval_secs must be greater than zero");
        }
        if self.mail.smtp_host.is_empty() {
            bail!("mail.smtp_host must be set");
        }
        if self.mail.from.is_empty() {
            bail!("mail.from must be set");
        }
        if self.mail.recipients.is_empty() {
            bail!("mail.recipients must contain at least one address");
        }
        Ok(())
    }
}

fn parse_recipients(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
