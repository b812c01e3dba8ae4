use reqwest::Client;
use common::EventRecord;
use log::debug;
use crate::error::{CycleError, CycleResult};

/// Build the shared HTTP client. Request timeouts live here and nowhere else.
pub fn http_client(timeout_secs: u64) -> anyhow::Result<Client> {
    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()?;
    Ok(client)
}

#[derive(Clone)]
pub struct EventsClient {
    client: Client,
    endpoint: String,
    sort: String,
}

impl EventsClient {
    pub fn new(client: Client, endpoint: String, sort: String) -> Self {
        Self { client, endpoint, sort }
    }

    pub async fn fetch(&self, token: &str) -> CycleResult<Vec<EventRecord>> {
        let response = self.client
            .get(&self.endpoint)
            .query(&[("sort", self.sort.as_str())])
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CycleError::Fetch(format!("{} returned {}: {}", self.endpoint, status, body.trim())));
        }

        let records: Vec<EventRecord> = response.json().await?;
        debug!("Fetched {} events from {}", records.len(), self.endpoint);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> EventsClient {
        EventsClient::new(
            http_client(5).unwrap(),
            format!("{}/v2/campus/1/events/", server.uri()),
            "-id".to_string(),
        )
    }

    #[tokio::test]
    async fn test_fetch_sends_bearer_and_sort() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/campus/1/events/"))
            .and(query_param("sort", "-id"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": 12, "name": "Exam" },
                { "id": 11, "name": "Talk", "max_people": 80 }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let records = client(&server).fetch("tok-1").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, 12);
        assert_eq!(records[1].max_people, Some(80));
    }

    #[tokio::test]
    async fn test_non_success_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
            .mount(&server)
            .await;

        let err = client(&server).fetch("tok-1").await.unwrap_err();
        match err {
            CycleError::Fetch(msg) => assert!(msg.contains("429")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unexpected_body_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": "nope" })))
            .mount(&server)
            .await;

        assert!(matches!(client(&server).fetch("tok-1").await, Err(CycleError::Fetch(_))));
    }
}
