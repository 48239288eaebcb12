//! Completion notifications for the user interface

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ControllerError;
use crate::http::client::HttpClient;

/// Socket namespace the UI listens on
pub const UI_NAMESPACE: &str = "/stand";

/// Room message relayed to connected clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub event: String,
    pub room: String,
    pub data: serde_json::Value,
    pub namespace: String,
}

impl Notification {
    /// Ask a user's deployment list to reload
    pub fn refresh(user_id: i64) -> Self {
        Self {
            event: "refresh".to_string(),
            room: format!("deployment.list.{}", user_id),
            data: serde_json::json!({}),
            namespace: UI_NAMESPACE.to_string(),
        }
    }
}

/// Delivers notifications; callers ignore failures
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), ControllerError>;
}

/// Posts notifications to the UI relay
pub struct HttpNotifier {
    client: HttpClient,
}

impl HttpNotifier {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), ControllerError> {
        self.client
            .post("/room", notification)
            .await
            .map_err(|e| ControllerError::NotifierError(e.to_string()))
    }
}

/// Used when no relay is configured
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), ControllerError> {
        debug!("Notification dropped: {:?}", notification);
        Ok(())
    }
}
