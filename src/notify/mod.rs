use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationButton {
    pub title: String,
}

impl NotificationButton {
    pub fn new(title: impl Into<String>) -> Self {
        Self { title: title.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationItem {
    pub title: String,
    pub message: String,
}

/// 通知の種別。list はアイテムのプレビューを持つ
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NotificationKind {
    Basic,
    List { items: Vec<NotificationItem> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub priority: u8,
    #[serde(flatten)]
    pub kind: NotificationKind,
    #[serde(default)]
    pub buttons: Vec<NotificationButton>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn create(&self, id: &str, notification: Notification) -> Result<(), AppError>;
    async fn clear(&self, id: &str) -> Result<bool, AppError>;
}

/// 表示中の通知をメモリ上に保持する Notifier
/// UI は GET /notifications で表示中の通知を取得する
#[derive(Default)]
pub struct InMemoryNotifier {
    active: Mutex<HashMap<String, Notification>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn active(&self) -> HashMap<String, Notification> {
        self.active.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn create(&self, id: &str, notification: Notification) -> Result<(), AppError> {
        info!(
            "Notification {}: {} - {}",
            id, notification.title, notification.message
        );
        self.active
            .lock()
            .await
            .insert(id.to_string(), notification);
        Ok(())
    }

    async fn clear(&self, id: &str) -> Result<bool, AppError> {
        Ok(self.active.lock().await.remove(id).is_some())
    }
}

pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn create(&self, _id: &str, _notification: Notification) -> Result<(), AppError> {
        Ok(())
    }

    async fn clear(&self, _id: &str) -> Result<bool, AppError> {
        Ok(false)
    }
}
