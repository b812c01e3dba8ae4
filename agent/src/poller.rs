use std::sync::Arc;
use async_trait::async_trait;
use log::info;
use crate::api::EventsClient;
use crate::credentials::CredentialManager;
use crate::digest::DigestEngine;
use crate::error::{CycleError, CycleResult};
use crate::mailer::{MailTransport, OutgoingMail};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub fetched: usize,
    pub new_records: usize,
    pub dispatched: bool,
}

/// One acquire -> fetch -> diff -> dispatch pass.
#[async_trait]
pub trait CycleRunner: Send + Sync {
    async fn run_cycle(&self) -> CycleResult<CycleReport>;
}

pub struct Poller {
    credentials: Arc<CredentialManager>,
    events: EventsClient,
    digest: DigestEngine,
    mailer: Arc<dyn MailTransport>,
    from: String,
    recipients: Vec<String>,
}

impl Poller {
    pub fn new(
        credentials: Arc<CredentialManager>,
        events: EventsClient,
        digest: DigestEngine,
        mailer: Arc<dyn MailTransport>,
        from: String,
        recipients: Vec<String>,
    ) -> Self {
        Self { credentials, events, digest, mailer, from, recipients }
    }
}

#[async_trait]
impl CycleRunner for Poller {
    async fn run_cycle(&self) -> CycleResult<CycleReport> {
        let token = self
            .credentials
            .get_valid_token()
            .await
            .ok_or_else(|| CycleError::Acquisition("no access token available".to_string()))?;

        let records = self.events.fetch(&token).await?;
        let mut report = CycleReport { fetched: records.len(), ..Default::default() };

        let Some(digest) = self.digest.compute_digest(&records).await? else {
            return Ok(report);
        };
        report.new_records = digest.new_records;

        if digest.subject.is_empty() || digest.body.is_empty() {
            return Ok(report);
        }

        let mail = OutgoingMail {
            from: self.from.clone(),
            to: self.recipients.clone(),
            subject: digest.subject,
            body: digest.body,
        };
        self.mailer.send(&mail).await?;
        info!("Email sent successfully to {} recipient(s): {}", mail.to.len(), mail.subject);
        report.dispatched = true;

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::http_client;
    use crate::baseline::BaselineStore;
    use crate::mailer::testing::RecordingMailer;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        server: MockServer,
        mailer: Arc<RecordingMailer>,
        store: BaselineStore,
        poller: Poller,
        _dir: tempfile::TempDir,
    }

    async fn harness(mailer: RecordingMailer) -> Harness {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let store = BaselineStore::new(dir.path().join("last_result.json"));
        let mailer = Arc::new(mailer);
        let http = http_client(5).unwrap();

        let credentials = Arc::new(CredentialManager::new(
            http.clone(),
            format!("{}/oauth/token", server.uri()),
            "uid".to_string(),
            "s-secret".to_string(),
        ));
        let poller = Poller::new(
            credentials,
            EventsClient::new(http, format!("{}/v2/campus/1/events/", server.uri()), "-id".to_string()),
            DigestEngine::new(store.clone(), "https://profile.intra.42.fr/events/".to_string()),
            mailer.clone(),
            "watcher@example.com".to_string(),
            vec!["a@example.com".to_string(), "b@example.com".to_string()],
        );

        Harness { server, mailer, store, poller, _dir: dir }
    }

    async fn mount_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok-1",
                "expires_in": 7200,
                "secret_valid_until": 2_592_000
            })))
            .mount(server)
            .await;
    }

    async fn mount_events(server: &MockServer, ids: &[i64]) {
        let body: Vec<_> = ids.iter().map(|id| json!({ "id": id, "name": format!("Event {}", id) })).collect();
        Mock::given(method("GET"))
            .and(path("/v2/campus/1/events/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_new_events_are_mailed_to_every_recipient() {
        let h = harness(RecordingMailer::default()).await;
        mount_token(&h.server).await;
        mount_events(&h.server, &[105, 103, 99]).await;
        h.store
            .save(&[serde_json::from_value(json!({ "id": 100 })).unwrap()])
            .await
            .unwrap();

        let report = h.poller.run_cycle().await.unwrap();
        assert_eq!(report, CycleReport { fetched: 3, new_records: 2, dispatched: true });

        let sent = h.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "New 42 Events Detected (2 new events)");
        assert_eq!(sent[0].to, vec!["a@example.com", "b@example.com"]);
        assert_eq!(sent[0].from, "watcher@example.com");
        assert_eq!(h.store.load().await.unwrap().unwrap().watermark_id(), 105);
    }

    #[tokio::test]
    async fn test_repeat_cycle_mails_zero_count_digest() {
        let h = harness(RecordingMailer::default()).await;
        mount_token(&h.server).await;
        mount_events(&h.server, &[3, 2, 1]).await;

        assert!(h.poller.run_cycle().await.unwrap().dispatched);
        let second = h.poller.run_cycle().await.unwrap();
        assert_eq!(second, CycleReport { fetched: 3, new_records: 0, dispatched: true });

        let sent = h.mailer.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].subject, "New 42 Events Detected (0 new events)");
        assert_eq!(h.store.load().await.unwrap().unwrap().watermark_id(), 3);
    }

    #[tokio::test]
    async fn test_empty_fetch_sends_nothing() {
        let h = harness(RecordingMailer::default()).await;
        mount_token(&h.server).await;
        mount_events(&h.server, &[]).await;

        let report = h.poller.run_cycle().await.unwrap();
        assert_eq!(report, CycleReport::default());
        assert!(h.store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_token_skips_fetch() {
        let h = harness(RecordingMailer::default()).await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "error": "server_error" })))
            .mount(&h.server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(0)
            .mount(&h.server)
            .await;

        assert!(matches!(h.poller.run_cycle().await, Err(CycleError::Acquisition(_))));
        assert!(h.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_baseline_alone() {
        let h = harness(RecordingMailer::default()).await;
        mount_token(&h.server).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&h.server)
            .await;

        assert!(matches!(h.poller.run_cycle().await, Err(CycleError::Fetch(_))));
        assert!(h.store.load().await.unwrap().is_none());
        assert!(h.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_mail_failure_loses_digest_but_advances_baseline() {
        let h = harness(RecordingMailer::failing()).await;
        mount_token(&h.server).await;
        mount_events(&h.server, &[7]).await;

        assert!(matches!(h.poller.run_cycle().await, Err(CycleError::Dispatch(_))));
        assert_eq!(h.store.load().await.unwrap().unwrap().watermark_id(), 7);

        // Not retried: the next cycle only reports zero new events.
        h.mailer.fail.store(false, std::sync::atomic::Ordering::SeqCst);
        let report = h.poller.run_cycle().await.unwrap();
        assert_eq!(report, CycleReport { fetched: 1, new_records: 0, dispatched: true });
        let sent = h.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "New 42 Events Detected (0 new events)");
    }
}
