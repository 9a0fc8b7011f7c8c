//! HTTP client backend for the central plan store server.

use std::time::Duration;

use kasmos_core::types::{PlanEntry, PlanStatus, TopicEntry};
use serde::Deserialize;
use tracing::debug;

use crate::error::StoreError;
use crate::store::PlanStore;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Store client speaking the `/v1` REST surface. Every transport failure
/// surfaces as `StoreError::Unreachable` so callers can degrade gracefully.
#[derive(Debug, Clone)]
pub struct HttpStore {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpStore {
    pub fn new(base_url: &str) -> Result<Self, StoreError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| StoreError::Unreachable {
                cause: err.to_string(),
            })?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn plans_url(&self, project: &str) -> String {
        format!(
            "{}/v1/projects/{}/plans",
            self.base_url,
            escape_segment(project)
        )
    }

    fn plan_item_url(&self, project: &str, filename: &str) -> String {
        format!("{}/{}", self.plans_url(project), escape_segment(filename))
    }

    fn topics_url(&self, project: &str) -> String {
        format!(
            "{}/v1/projects/{}/topics",
            self.base_url,
            escape_segment(project)
        )
    }

    fn send(&self, request: reqwest::blocking::RequestBuilder) -> Result<Response, StoreError> {
        let response = request.send().map_err(|err| StoreError::Unreachable {
            cause: err.to_string(),
        })?;
        let status = response.status().as_u16();
        let body = response.text().map_err(|err| StoreError::Unreachable {
            cause: err.to_string(),
        })?;
        Ok(Response { status, body })
    }
}

struct Response {
    status: u16,
    body: String,
}

impl Response {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Decodes the `{"error": ...}` body into a typed store error, mapping
    /// 404 and 409 onto the not-found/conflict variants.
    fn into_error(self, kind: &'static str, key: &str) -> StoreError {
        match self.status {
            404 => StoreError::NotFound {
                kind,
                key: key.to_string(),
            },
            409 => StoreError::AlreadyExists {
                kind,
                key: key.to_string(),
            },
            status => {
                #[derive(Deserialize)]
                struct ErrorBody {
                    error: String,
                }
                let message = serde_json::from_str::<ErrorBody>(&self.body)
                    .map(|body| body.error)
                    .unwrap_or_else(|_| format!("unexpected status {status}"));
                StoreError::Server { status, message }
            }
        }
    }
}

fn escape_segment(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                escaped.push(byte as char)
            }
            other => escaped.push_str(&format!("%{other:02X}")),
        }
    }
    escaped
}

impl PlanStore for HttpStore {
    fn create(&self, project: &str, entry: PlanEntry) -> Result<(), StoreError> {
        let filename = entry.filename.clone();
        let response = self.send(self.client.post(self.plans_url(project)).json(&entry))?;
        if response.status != 201 {
            return Err(response.into_error("plan", &filename));
        }
        debug!(%filename, "created plan on remote store");
        Ok(())
    }

    fn get(&self, project: &str, filename: &str) -> Result<PlanEntry, StoreError> {
        let response = self.send(self.client.get(self.plan_item_url(project, filename)))?;
        if !response.is_success() {
            return Err(response.into_error("plan", filename));
        }
        response.json()
    }

    fn update(&self, project: &str, filename: &str, entry: PlanEntry) -> Result<(), StoreError> {
        let response = self.send(
            self.client
                .put(self.plan_item_url(project, filename))
                .json(&entry),
        )?;
        if !response.is_success() {
            return Err(response.into_error("plan", filename));
        }
        Ok(())
    }

    fn rename(&self, project: &str, old: &str, new: &str) -> Result<(), StoreError> {
        let url = format!("{}/rename", self.plan_item_url(project, old));
        let payload = serde_json::json!({ "new_filename": new });
        let response = self.send(self.client.post(url).json(&payload))?;
        if !response.is_success() {
            return Err(response.into_error("plan", old));
        }
        Ok(())
    }

    fn list(&self, project: &str) -> Result<Vec<PlanEntry>, StoreError> {
        let response = self.send(self.client.get(self.plans_url(project)))?;
        if !response.is_success() {
            return Err(response.into_error("plan", project));
        }
        response.json()
    }

    fn list_by_status(
        &self,
        project: &str,
        statuses: &[PlanStatus],
    ) -> Result<Vec<PlanEntry>, StoreError> {
        let query: Vec<(&str, &str)> = statuses
            .iter()
            .map(|status| ("status", status.as_str()))
            .collect();
        let response = self.send(self.client.get(self.plans_url(project)).query(&query))?;
        if !response.is_success() {
            return Err(response.into_error("plan", project));
        }
        response.json()
    }

    fn list_by_topic(&self, project: &str, topic: &str) -> Result<Vec<PlanEntry>, StoreError> {
        let response = self.send(
            self.client
                .get(self.plans_url(project))
                .query(&[("topic", topic)]),
        )?;
        if !response.is_success() {
            return Err(response.into_error("plan", project));
        }
        response.json()
    }

    fn get_content(&self, project: &str, filename: &str) -> Result<String, StoreError> {
        let url = format!("{}/content", self.plan_item_url(project, filename));
        let response = self.send(self.client.get(url))?;
        if !response.is_success() {
            return Err(response.into_error("plan", filename));
        }
        Ok(response.body)
    }

    fn set_content(
        &self,
        project: &str,
        filename: &str,
        content: &str,
    ) -> Result<(), StoreError> {
        let url = format!("{}/content", self.plan_item_url(project, filename));
        let response = self.send(
            self.client
                .put(url)
                .header("Content-Type", "text/markdown")
                .body(content.to_string()),
        )?;
        if !response.is_success() {
            return Err(response.into_error("plan", filename));
        }
        Ok(())
    }

    fn list_topics(&self, project: &str) -> Result<Vec<TopicEntry>, StoreError> {
        let response = self.send(self.client.get(self.topics_url(project)))?;
        if !response.is_success() {
            return Err(response.into_error("topic", project));
        }
        response.json()
    }

    fn create_topic(&self, project: &str, entry: TopicEntry) -> Result<(), StoreError> {
        let name = entry.name.clone();
        let response = self.send(self.client.post(self.topics_url(project)).json(&entry))?;
        if response.status != 201 {
            return Err(response.into_error("topic", &name));
        }
        Ok(())
    }

    /// Health probe with a shorter timeout than regular requests.
    fn ping(&self) -> Result<(), StoreError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(PING_TIMEOUT)
            .build()
            .map_err(|err| StoreError::Unreachable {
                cause: err.to_string(),
            })?;
        let response = client
            .get(format!("{}/v1/ping", self.base_url))
            .send()
            .map_err(|err| StoreError::Unreachable {
                cause: err.to_string(),
            })?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(StoreError::Server {
                status,
                message: format!("ping returned status {status}"),
            });
        }
        Ok(())
    }

    fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
