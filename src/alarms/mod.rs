use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::AppError;

/// タスクリマインダーのアラーム名の接頭辞
pub const TASK_REMINDER_PREFIX: &str = "task-reminder-";
/// 日次サマリーの定期アラーム名
pub const DAILY_SUMMARY_ALARM: &str = "daily-summary";
/// 週次レビューの定期アラーム名
pub const WEEKLY_REVIEW_ALARM: &str = "weekly-review";

pub fn task_reminder_alarm(task_id: &str) -> String {
    format!("{TASK_REMINDER_PREFIX}{task_id}")
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlarmSchedule {
    /// 絶対時刻で一回だけ発火
    At(DateTime<Utc>),
    /// 現在時刻からの遅延で一回だけ発火
    After(Duration),
    /// 初回発火時刻から一定周期で発火し続ける
    Periodic { first: DateTime<Utc>, every: Duration },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alarm {
    pub name: String,
    pub fire_at: DateTime<Utc>,
    pub period: Option<Duration>,
}

/// 名前付きアラームのサービス。同名での create は既存アラームを置き換える
#[async_trait]
pub trait AlarmService: Send + Sync {
    async fn create(&self, name: &str, schedule: AlarmSchedule) -> Result<(), AppError>;
    async fn clear(&self, name: &str) -> Result<bool, AppError>;
    async fn get_all(&self) -> Result<Vec<Alarm>, AppError>;
}

struct AlarmEntry {
    alarm: Alarm,
    generation: u64,
    handle: JoinHandle<()>,
}

/// tokio タスクの sleep でアラームを実装するサービス
/// 発火したアラーム名はチャネルに流す
pub struct TokioAlarmService {
    fired_tx: mpsc::UnboundedSender<String>,
    entries: Arc<Mutex<HashMap<String, AlarmEntry>>>,
    generation: AtomicU64,
}

impl TokioAlarmService {
    pub fn new(fired_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            fired_tx,
            entries: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }
}

fn sleep_duration(fire_at: DateTime<Utc>) -> std::time::Duration {
    // 過去の時刻は即時発火
    (fire_at - Utc::now()).to_std().unwrap_or(std::time::Duration::ZERO)
}

async fn run_alarm(
    name: String,
    generation: u64,
    mut fire_at: DateTime<Utc>,
    period: Option<Duration>,
    fired_tx: mpsc::UnboundedSender<String>,
    entries: Arc<Mutex<HashMap<String, AlarmEntry>>>,
) {
    loop {
        tokio::time::sleep(sleep_duration(fire_at)).await;
        if fired_tx.send(name.clone()).is_err() {
            break;
        }

        match period {
            Some(every) => {
                fire_at = fire_at + every;
                let mut entries = entries.lock().await;
                if let Some(entry) = entries.get_mut(&name) {
                    // create で置き換えられていた場合は古い世代のまま触らない
                    if entry.generation == generation {
                        entry.alarm.fire_at = fire_at;
                    }
                }
            }
            None => {
                let mut entries = entries.lock().await;
                if entries.get(&name).map(|entry| entry.generation) == Some(generation) {
                    entries.remove(&name);
                }
                break;
            }
        }
    }
}

#[async_trait]
impl AlarmService for TokioAlarmService {
    async fn create(&self, name: &str, schedule: AlarmSchedule) -> Result<(), AppError> {
        let (fire_at, period) = match schedule {
            AlarmSchedule::At(when) => (when, None),
            AlarmSchedule::After(delay) => (Utc::now() + delay, None),
            AlarmSchedule::Periodic { first, every } => (first, Some(every)),
        };

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.lock().await;
        if let Some(previous) = entries.remove(name) {
            previous.handle.abort();
        }

        let handle = tokio::spawn(run_alarm(
            name.to_string(),
            generation,
            fire_at,
            period,
            self.fired_tx.clone(),
            Arc::clone(&self.entries),
        ));
        entries.insert(
            name.to_string(),
            AlarmEntry {
                alarm: Alarm {
                    name: name.to_string(),
                    fire_at,
                    period,
                },
                generation,
                handle,
            },
        );
        debug!("Alarm scheduled: {} at {}", name, fire_at);
        Ok(())
    }

    async fn clear(&self, name: &str) -> Result<bool, AppError> {
        let mut entries = self.entries.lock().await;
        match entries.remove(name) {
            Some(entry) => {
                entry.handle.abort();
                debug!("Alarm cleared: {}", name);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_all(&self) -> Result<Vec<Alarm>, AppError> {
        let entries = self.entries.lock().await;
        Ok(entries.values().map(|entry| entry.alarm.clone()).collect())
    }
}
