//! JSON-RPC 2.0 transport for the agent-mail service.
//!
//! Tools used: `ensure_project`, `register_agent`, `send_message`,
//! `fetch_inbox`, `delete_messages`, `file_reservation_paths`,
//! `release_file_reservations`, `renew_file_reservations`. Reservation
//! listings are read through `resources/read` on
//! `resource://file_reservations/<slug>` (and `.../product/<uid>`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use corral_core::types::Reservation;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail service unreachable: {0}")]
    Http(#[from] reqwest::Error),
    #[error("mail service error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("unexpected mail service response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, MailError>;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Normal,
    Urgent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxMessage {
    pub id: u64,
    pub from: String,
    pub subject: String,
    pub body: String,
    #[serde(default = "default_importance")]
    pub importance: Importance,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

fn default_importance() -> Importance {
    Importance::Normal
}

/// A holder blocking a reservation attempt, as reported by the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictHolder {
    pub holder: String,
    pub path_pattern: String,
    #[serde(default)]
    pub reservation_id: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReserveOutcome {
    #[serde(default)]
    pub granted: Vec<Reservation>,
    #[serde(default)]
    pub conflicts: Vec<ConflictHolder>,
}

/// What to release: by path pattern, by reservation id, or everything the
/// agent holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseSpec {
    Paths(Vec<String>),
    Ids(Vec<u64>),
    All,
}

// ---------------------------------------------------------------------------
// MailTransport — the seam
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn ensure_project(&self, project_key: &str) -> Result<()>;

    async fn register_agent(&self, project_key: &str, name: &str) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    async fn send_message(
        &self,
        project_key: &str,
        sender: &str,
        to: &[String],
        subject: &str,
        body: &str,
        importance: Importance,
    ) -> Result<()>;

    async fn fetch_inbox(&self, project_key: &str, agent: &str, limit: usize)
        -> Result<Vec<InboxMessage>>;

    /// Inbox across every project of a product (cross-repo).
    async fn fetch_inbox_product(
        &self,
        product_uid: &str,
        agent: &str,
        limit: usize,
    ) -> Result<Vec<InboxMessage>>;

    async fn delete_messages(&self, project_key: &str, agent: &str, ids: &[u64]) -> Result<()>;

    async fn reserve_paths(
        &self,
        project_key: &str,
        agent: &str,
        paths: &[String],
        ttl_secs: u64,
        exclusive: bool,
        reason: &str,
    ) -> Result<ReserveOutcome>;

    /// Returns the reservations actually released.
    async fn release_reservations(
        &self,
        project_key: &str,
        agent: &str,
        spec: &ReleaseSpec,
    ) -> Result<Vec<Reservation>>;

    /// Extends every reservation the agent holds; returns the renewed set.
    async fn renew_reservations(
        &self,
        project_key: &str,
        agent: &str,
        extend_secs: u64,
    ) -> Result<Vec<Reservation>>;

    /// All reservations in a project.
    async fn list_reservations(&self, project_slug: &str) -> Result<Vec<Reservation>>;

    /// All reservations across a product (cross-repo).
    async fn list_product_reservations(&self, product_uid: &str) -> Result<Vec<Reservation>>;
}

// ---------------------------------------------------------------------------
// HttpMailClient
// ---------------------------------------------------------------------------

pub struct HttpMailClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    next_id: AtomicU64,
}

impl HttpMailClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            token,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!(method, id, "mail rpc call");

        let mut builder = self.http.post(&self.base_url).json(&request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        let response: Value = builder.send().await?.json().await?;

        if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
            return Err(MailError::Rpc {
                code: error.get("code").and_then(Value::as_i64).unwrap_or(-1),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| MailError::InvalidResponse("missing result".into()))
    }

    async fn read_resource(&self, uri: &str) -> Result<Value> {
        self.call("resources/read", json!({ "uri": uri })).await
    }

    fn parse_reservations(value: Value) -> Result<Vec<Reservation>> {
        let list = match value {
            Value::Array(items) => Value::Array(items),
            Value::Object(mut map) => map
                .remove("reservations")
                .ok_or_else(|| MailError::InvalidResponse("no reservations field".into()))?,
            other => {
                return Err(MailError::InvalidResponse(format!(
                    "unexpected reservation listing: {other}"
                )))
            }
        };
        serde_json::from_value(list).map_err(|e| MailError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl MailTransport for HttpMailClient {
    async fn ensure_project(&self, project_key: &str) -> Result<()> {
        self.call("ensure_project", json!({ "project_key": project_key }))
            .await?;
        Ok(())
    }

    async fn register_agent(&self, project_key: &str, name: &str) -> Result<()> {
        self.call(
            "register_agent",
            json!({ "project_key": project_key, "name": name }),
        )
        .await?;
        Ok(())
    }

    async fn send_message(
        &self,
        project_key: &str,
        sender: &str,
        to: &[String],
        subject: &str,
        body: &str,
        importance: Importance,
    ) -> Result<()> {
        self.call(
            "send_message",
            json!({
                "project_key": project_key,
                "sender": sender,
                "to": to,
                "subject": subject,
                "body": body,
                "importance": importance,
            }),
        )
        .await?;
        Ok(())
    }

    async fn fetch_inbox(
        &self,
        project_key: &str,
        agent: &str,
        limit: usize,
    ) -> Result<Vec<InboxMessage>> {
        let result = self
            .call(
                "fetch_inbox",
                json!({ "project_key": project_key, "agent": agent, "limit": limit }),
            )
            .await?;
        let messages = result
            .get("messages")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(messages).map_err(|e| MailError::InvalidResponse(e.to_string()))
    }

    async fn fetch_inbox_product(
        &self,
        product_uid: &str,
        agent: &str,
        limit: usize,
    ) -> Result<Vec<InboxMessage>> {
        let result = self
            .call(
                "fetch_inbox_product",
                json!({ "product_uid": product_uid, "agent": agent, "limit": limit }),
            )
            .await?;
        let messages = result
            .get("messages")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(messages).map_err(|e| MailError::InvalidResponse(e.to_string()))
    }

    async fn delete_messages(&self, project_key: &str, agent: &str, ids: &[u64]) -> Result<()> {
        self.call(
            "delete_messages",
            json!({ "project_key": project_key, "agent": agent, "ids": ids }),
        )
        .await?;
        Ok(())
    }

    async fn reserve_paths(
        &self,
        project_key: &str,
        agent: &str,
        paths: &[String],
        ttl_secs: u64,
        exclusive: bool,
        reason: &str,
    ) -> Result<ReserveOutcome> {
        let result = self
            .call(
                "file_reservation_paths",
                json!({
                    "project_key": project_key,
                    "agent": agent,
                    "paths": paths,
                    "ttl_seconds": ttl_secs,
                    "exclusive": exclusive,
                    "reason": reason,
                }),
            )
            .await?;
        serde_json::from_value(result).map_err(|e| MailError::InvalidResponse(e.to_string()))
    }

    async fn release_reservations(
        &self,
        project_key: &str,
        agent: &str,
        spec: &ReleaseSpec,
    ) -> Result<Vec<Reservation>> {
        let mut params = json!({ "project_key": project_key, "agent": agent });
        match spec {
            ReleaseSpec::Paths(paths) => params["paths"] = json!(paths),
            ReleaseSpec::Ids(ids) => params["ids"] = json!(ids),
            ReleaseSpec::All => params["all"] = json!(true),
        }
        let result = self.call("release_file_reservations", params).await?;
        let released = result
            .get("released")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(released).map_err(|e| MailError::InvalidResponse(e.to_string()))
    }

    async fn renew_reservations(
        &self,
        project_key: &str,
        agent: &str,
        extend_secs: u64,
    ) -> Result<Vec<Reservation>> {
        let result = self
            .call(
                "renew_file_reservations",
                json!({
                    "project_key": project_key,
                    "agent": agent,
                    "extend_seconds": extend_secs,
                }),
            )
            .await?;
        let renewed = result
            .get("renewed")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(renewed).map_err(|e| MailError::InvalidResponse(e.to_string()))
    }

    async fn list_reservations(&self, project_slug: &str) -> Result<Vec<Reservation>> {
        let value = self
            .read_resource(&format!("resource://file_reservations/{project_slug}"))
            .await?;
        Self::parse_reservations(value)
    }

    async fn list_product_reservations(&self, product_uid: &str) -> Result<Vec<Reservation>> {
        let value = self
            .read_resource(&format!("resource://file_reservations/product/{product_uid}"))
            .await?;
        Self::parse_reservations(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_listing_accepts_both_shapes() {
        let direct = json!([{
            "id": 1, "agent": "amber", "project_slug": "proj-a",
            "path_pattern": "src/*", "exclusive": true,
            "expires_at": "2026-03-01T10:00:00Z"
        }]);
        let wrapped = json!({ "reservations": direct.clone() });
        assert_eq!(HttpMailClient::parse_reservations(direct).unwrap().len(), 1);
        assert_eq!(HttpMailClient::parse_reservations(wrapped).unwrap().len(), 1);
    }

    #[test]
    fn reserve_outcome_defaults_empty_sections() {
        let outcome: ReserveOutcome = serde_json::from_value(json!({})).unwrap();
        assert!(outcome.granted.is_empty());
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn inbox_message_defaults_importance() {
        let msg: InboxMessage = serde_json::from_value(json!({
            "id": 3, "from": "amber", "subject": "s", "body": "b",
            "created_at": "2026-03-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(msg.importance, Importance::Normal);
    }
}
