use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::AppError;
use crate::models::{Category, Settings, Task, default_categories};

const KEY_TASKS: &str = "tasks";
const KEY_CATEGORIES: &str = "categories";
const KEY_SETTINGS: &str = "settings";

/// ストアで変更されたレコードの種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreChange {
    Tasks,
    Categories,
    Settings,
}

/// タスク・カテゴリ・設定の 3 レコードを JSON で保持するキーバリューストア
/// 書き込みのたびに変更種別をブロードキャストする
#[derive(Clone)]
pub struct Store {
    db: SqlitePool,
    changes: broadcast::Sender<StoreChange>,
}

impl Store {
    pub fn new(db: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self { db, changes }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    pub async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("select 1").execute(&self.db).await?;
        Ok(())
    }

    /// 初回起動時に欠けているレコードへデフォルト値を投入する
    pub async fn init_defaults(&self) -> Result<(), AppError> {
        if self.get_raw(KEY_TASKS).await?.is_none() {
            self.save_tasks(&[]).await?;
        }
        if self.get_raw(KEY_CATEGORIES).await?.is_none() {
            self.save_categories(&default_categories()).await?;
        }
        if self.get_raw(KEY_SETTINGS).await?.is_none() {
            self.save_settings(&Settings::default()).await?;
        }
        Ok(())
    }

    pub async fn get_tasks(&self) -> Result<Vec<Task>, AppError> {
        let Some(raw) = self.get_raw(KEY_TASKS).await? else {
            return Ok(Vec::new());
        };
        let values: Vec<serde_json::Value> = serde_json::from_str(&raw)?;

        // 壊れたレコードはハンドラごと落とさずに読み飛ばす
        let mut tasks = Vec::with_capacity(values.len());
        for value in values {
            match serde_json::from_value::<Task>(value) {
                Ok(task) => tasks.push(task),
                Err(err) => warn!("Skipping malformed task record: {}", err),
            }
        }
        Ok(tasks)
    }

    pub async fn save_tasks(&self, tasks: &[Task]) -> Result<(), AppError> {
        let value = serde_json::to_string(tasks)?;
        self.set_raw(KEY_TASKS, value, StoreChange::Tasks).await
    }

    pub async fn get_categories(&self) -> Result<Vec<Category>, AppError> {
        match self.get_raw(KEY_CATEGORIES).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn save_categories(&self, categories: &[Category]) -> Result<(), AppError> {
        let value = serde_json::to_string(categories)?;
        self.set_raw(KEY_CATEGORIES, value, StoreChange::Categories)
            .await
    }

    pub async fn get_settings(&self) -> Result<Settings, AppError> {
        match self.get_raw(KEY_SETTINGS).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Settings::default()),
        }
    }

    pub async fn save_settings(&self, settings: &Settings) -> Result<(), AppError> {
        let value = serde_json::to_string(settings)?;
        self.set_raw(KEY_SETTINGS, value, StoreChange::Settings).await
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>, AppError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM storage WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn set_raw(&self, key: &str, value: String, change: StoreChange) -> Result<(), AppError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO storage (key, value, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.db)
        .await?;

        // 購読者がいない場合の送信エラーは無視してよい
        let _ = self.changes.send(change);
        Ok(())
    }
}
