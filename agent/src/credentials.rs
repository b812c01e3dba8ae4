//! OAuth client-credentials token management.
//!
//! Hands out a bearer token, renewing it when it expires, and warns once per
//! threshold as the client secret behind it approaches its own expiry.

use chrono::{DateTime, Duration, Utc};
use common::CredentialSnapshot;
use log::{debug, error, info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use crate::mailer::{MailTransport, OutgoingMail};

/// Seconds-before-expiry and label, checked in this order.
pub const SECRET_EXPIRY_THRESHOLDS: [(i64, &str); 6] = [
    (604_800, "one week"),
    (86_400, "one day"),
    (3_600, "one hour"),
    (600, "ten minutes"),
    (60, "one minute"),
    (1, "imminent"),
];

const ALERT_SUBJECT: &str = "42 API Secret Expiry Alert";

#[derive(Debug, Default)]
struct CredentialState {
    access_token: Option<String>,
    token_expires_at: Option<DateTime<Utc>>,
    secret_expires_at: Option<DateTime<Utc>>,
    // Only ever grows.
    notified: HashSet<i64>,
}

impl CredentialState {
    /// Marks and returns every threshold newly crossed with `millis_left` remaining.
    fn cross_thresholds(&mut self, millis_left: i64) -> Vec<&'static str> {
        let mut crossed = Vec::new();
        for (threshold, label) in SECRET_EXPIRY_THRESHOLDS {
            if threshold * 1000 > millis_left && self.notified.insert(threshold) {
                crossed.push(label);
            }
        }
        crossed
    }

    fn token_is_stale(&self, now: DateTime<Utc>) -> bool {
        match (&self.access_token, self.token_expires_at) {
            (Some(_), Some(expires_at)) => now > expires_at,
            _ => true,
        }
    }
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
    /// Remaining lifetime of the client secret, in seconds.
    secret_valid_until: Option<i64>,
}

#[derive(Deserialize, Default)]
struct TokenErrorBody {
    error: Option<String>,
    message: Option<String>,
}

enum TokenGrant {
    Issued {
        access_token: String,
        expires_at: DateTime<Utc>,
        secret_expires_at: Option<DateTime<Utc>>,
    },
    Empty,
}

/// `now + secs`, or `None` when the upstream value does not fit a timestamp.
fn expires_after(now: DateTime<Utc>, secs: i64) -> Option<DateTime<Utc>> {
    Duration::try_seconds(secs).and_then(|d| now.checked_add_signed(d))
}

struct ExpiryAlerts {
    mailer: Arc<dyn MailTransport>,
    from: String,
    recipients: Vec<String>,
}

pub struct CredentialManager {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    state: Mutex<CredentialState>,
    alerts: Option<ExpiryAlerts>,
}

impl CredentialManager {
    pub fn new(http: Client, token_url: String, client_id: String, client_secret: String) -> Self {
        Self {
            http,
            token_url,
            client_id,
            client_secret,
            state: Mutex::new(CredentialState::default()),
            alerts: None,
        }
    }

    /// Also mail each threshold warning to `recipients`.
    pub fn with_alerts(mut self, mailer: Arc<dyn MailTransport>, from: String, recipients: Vec<String>) -> Self {
        self.alerts = Some(ExpiryAlerts { mailer, from, recipients });
        self
    }

    /// A currently valid bearer token, or `None` if none could be obtained this round.
    pub async fn get_valid_token(&self) -> Option<String> {
        self.get_valid_token_at(Utc::now()).await
    }

    pub async fn get_valid_token_at(&self, now: DateTime<Utc>) -> Option<String> {
        let crossed = {
            let mut state = self.state.lock().await;
            match state.secret_expires_at {
                Some(secret_expires_at) => {
                    let millis_left = (secret_expires_at - now).num_milliseconds();
                    state.cross_thresholds(millis_left)
                }
                None => {
                    if state.access_token.is_none() {
                        info!("First time fetching access token");
                    }
                    Vec::new()
                }
            }
        };

        // Mailed and fetched without the lock held; snapshots stay responsive.
        for label in crossed {
            warn!("Secret expires in less than {}", label);
            self.send_alert(label).await;
        }

        {
            let state = self.state.lock().await;
            if !state.token_is_stale(now) {
                return state.access_token.clone();
            }
        }

        let grant = self.fetch_new_token(now).await?;
        let mut state = self.state.lock().await;
        match grant {
            TokenGrant::Issued { access_token, expires_at, secret_expires_at } => {
                state.access_token = Some(access_token);
                state.token_expires_at = Some(expires_at);
                if secret_expires_at.is_some() {
                    state.secret_expires_at = secret_expires_at;
                }
                info!("Fetched new access token (expires at {})", expires_at.to_rfc3339());
            }
            // A success without a token keeps whatever was cached before, stale or not.
            TokenGrant::Empty => debug!("Token response carried no access_token, keeping cached token"),
        }
        state.access_token.clone()
    }

    /// One client-credentials request. `None` means the acquisition failed.
    async fn fetch_new_token(&self, now: DateTime<Utc>) -> Option<TokenGrant> {
        let request = TokenRequest {
            grant_type: "client_credentials",
            client_id: &self.client_id,
            client_secret: &self.client_secret,
        };

        let response = match self.http.post(&self.token_url).json(&request).send().await {
            Ok(r) => r,
            Err(e) => {
                error!("Failed to reach token endpoint {}: {}", self.token_url, e);
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body: TokenErrorBody = response.json().await.unwrap_or_default();
            error!(
                "Failed to fetch access token: {} {}: {}",
                status,
                body.error.as_deref().unwrap_or("unknown_error"),
                body.message.as_deref().unwrap_or("no message")
            );
            return None;
        }

        let token: TokenResponse = match response.json().await {
            Ok(t) => t,
            Err(e) => {
                error!("Malformed token response: {}", e);
                return None;
            }
        };

        let Some(access_token) = token.access_token else {
            return Some(TokenGrant::Empty);
        };

        let expires_in = token.expires_in.unwrap_or(0);
        let Some(expires_at) = expires_after(now, expires_in) else {
            error!("Malformed token response: expires_in {} is out of range", expires_in);
            return None;
        };

        let secret_expires_at = match token.secret_valid_until {
            Some(secs) => match expires_after(now, secs) {
                Some(at) => Some(at),
                None => {
                    error!("Malformed token response: secret_valid_until {} is out of range", secs);
                    return None;
                }
            },
            None => {
                warn!("Token response carried no secret_valid_until, secret expiry unchanged");
                None
            }
        };

        Some(TokenGrant::Issued { access_token, expires_at, secret_expires_at })
    }

    async fn send_alert(&self, label: &str) {
        let Some(alerts) = &self.alerts else { return };
        let mail = OutgoingMail {
            from: alerts.from.clone(),
            to: alerts.recipients.clone(),
            subject: ALERT_SUBJECT.to_string(),
            body: format!("Secret expires in less than {}", label),
        };
        if let Err(e) = alerts.mailer.send(&mail).await {
            error!("Failed to send secret expiry alert: {}", e);
        }
    }

    pub async fn snapshot(&self) -> CredentialSnapshot {
        self.snapshot_at(Utc::now()).await
    }

    pub async fn snapshot_at(&self, now: DateTime<Utc>) -> CredentialSnapshot {
        let state = self.state.lock().await;
        CredentialSnapshot {
            has_token: state.access_token.is_some(),
            token_expires_at: state.token_expires_at,
            secret_expires_at: state.secret_expires_at,
            secret_seconds_left: state.secret_expires_at.map(|t| (t - now).num_seconds()),
            notified_thresholds: SECRET_EXPIRY_THRESHOLDS
                .iter()
                .filter(|(threshold, _)| state.notified.contains(threshold))
                .map(|(_, label)| label.to_string())
                .collect(),
        }
    }
}
