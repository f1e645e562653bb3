use std::sync::Arc;

use chrono::{Duration, Local, Utc};
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tracing::{debug, info, warn};

use crate::alarms::{
    AlarmSchedule, AlarmService, DAILY_SUMMARY_ALARM, TASK_REMINDER_PREFIX, WEEKLY_REVIEW_ALARM,
    task_reminder_alarm,
};
use crate::db::{Store, StoreChange};
use crate::error::AppError;
use crate::models::{Settings, Task};
use crate::notify::{
    Notification, NotificationButton, NotificationItem, NotificationKind, Notifier,
};
use crate::utils::date::{local_day_bounds, next_daily_summary_time, next_weekly_review_time};

/// 通知 ID の接頭辞 (task-<taskId>)
const TASK_NOTIFICATION_PREFIX: &str = "task-";
/// 日次サマリーに載せるプレビューの最大件数
const DAILY_SUMMARY_MAX_ITEMS: usize = 5;
/// スヌーズの遅延 (分)
const SNOOZE_DELAY_MINUTES: i64 = 15;

/// リマインダースケジューラー
/// タスクリストとアラーム集合を同期し、発火時に通知を表示して
/// 通知ボタンの応答をタスクリストへ反映する
pub struct ReminderScheduler {
    store: Store,
    alarms: Arc<dyn AlarmService>,
    notifier: Arc<dyn Notifier>,
}

impl ReminderScheduler {
    pub fn new(store: Store, alarms: Arc<dyn AlarmService>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            alarms,
            notifier,
        }
    }

    /// 起動時の初期化: ストアの現在値からアラーム集合を組み立てる
    /// (アラームはプロセススコープなので毎回作り直す)
    pub async fn bootstrap(&self) -> Result<(), AppError> {
        let tasks = self.store.get_tasks().await?;
        self.reconcile_task_alarms(&tasks).await?;
        let settings = self.store.get_settings().await?;
        self.apply_notification_settings(&settings).await?;
        Ok(())
    }

    /// ストア変更とアラーム発火を一件ずつ処理するイベントループ
    pub async fn run(self: Arc<Self>, mut fired: mpsc::UnboundedReceiver<String>) {
        let mut changes = self.store.subscribe();
        info!("Starting reminder scheduler");

        loop {
            tokio::select! {
                change = changes.recv() => match change {
                    Ok(change) => {
                        if let Err(err) = self.handle_store_change(change).await {
                            warn!("Failed to handle store change: {:?}", err);
                            // エラーが発生してもループは継続
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Store change stream lagged by {}, resyncing", skipped);
                        if let Err(err) = self.bootstrap().await {
                            warn!("Failed to resync after lag: {:?}", err);
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
                name = fired.recv() => match name {
                    Some(name) => {
                        if let Err(err) = self.handle_alarm(&name).await {
                            warn!("Failed to handle alarm {}: {:?}", name, err);
                        }
                    }
                    None => break,
                },
            }
        }

        info!("Reminder scheduler stopped");
    }

    async fn handle_store_change(&self, change: StoreChange) -> Result<(), AppError> {
        match change {
            StoreChange::Tasks => {
                let tasks = self.store.get_tasks().await?;
                self.reconcile_task_alarms(&tasks).await
            }
            StoreChange::Settings => {
                let settings = self.store.get_settings().await?;
                self.apply_notification_settings(&settings).await
            }
            StoreChange::Categories => Ok(()),
        }
    }

    /// タスクリマインダーのアラームを全消去してから作り直す
    /// 同じ入力で二回呼んでも同じアラーム集合になる
    pub async fn reconcile_task_alarms(&self, tasks: &[Task]) -> Result<(), AppError> {
        for alarm in self.alarms.get_all().await? {
            if alarm.name.starts_with(TASK_REMINDER_PREFIX) {
                self.alarms.clear(&alarm.name).await?;
            }
        }

        let now = Utc::now();
        for task in tasks {
            let Some(reminder) = &task.reminder else {
                continue;
            };
            // 過去のリマインダー時刻は黙って落とす (発火し損ねた扱い)
            if reminder.enabled && !task.completed && reminder.time > now {
                self.alarms
                    .create(
                        &task_reminder_alarm(&task.id),
                        AlarmSchedule::At(reminder.time),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// 通知設定に応じて定期アラームを作成・解除する
    pub async fn apply_notification_settings(&self, settings: &Settings) -> Result<(), AppError> {
        let now = Local::now();

        if settings.notifications.daily_summary {
            self.alarms
                .create(
                    DAILY_SUMMARY_ALARM,
                    AlarmSchedule::Periodic {
                        first: next_daily_summary_time(now),
                        every: Duration::minutes(24 * 60),
                    },
                )
                .await?;
        } else {
            self.alarms.clear(DAILY_SUMMARY_ALARM).await?;
        }

        if settings.notifications.weekly_review {
            self.alarms
                .create(
                    WEEKLY_REVIEW_ALARM,
                    AlarmSchedule::Periodic {
                        first: next_weekly_review_time(now),
                        every: Duration::minutes(7 * 24 * 60),
                    },
                )
                .await?;
        } else {
            self.alarms.clear(WEEKLY_REVIEW_ALARM).await?;
        }
        Ok(())
    }

    /// アラーム発火のディスパッチ
    pub async fn handle_alarm(&self, name: &str) -> Result<(), AppError> {
        debug!("Alarm fired: {}", name);

        if let Some(task_id) = name.strip_prefix(TASK_REMINDER_PREFIX) {
            self.show_task_reminder(task_id).await
        } else if name == DAILY_SUMMARY_ALARM {
            self.show_daily_summary().await
        } else if name == WEEKLY_REVIEW_ALARM {
            self.show_weekly_review().await
        } else {
            debug!("Ignoring unknown alarm: {}", name);
            Ok(())
        }
    }

    async fn show_task_reminder(&self, task_id: &str) -> Result<(), AppError> {
        // スケジュール時点の値ではなく常に現在のタスクを読み直す
        let tasks = self.store.get_tasks().await?;
        let Some(task) = tasks.iter().find(|task| task.id == task_id) else {
            debug!("Reminder fired for missing task {}, skipping", task_id);
            return Ok(());
        };
        if task.completed {
            return Ok(());
        }

        let notification = Notification {
            title: "タスクリマインダー".to_string(),
            message: task.title.clone(),
            priority: task.priority.notification_priority(),
            kind: NotificationKind::Basic,
            buttons: vec![
                NotificationButton::new("完了にする"),
                NotificationButton::new("スヌーズ (15分後)"),
            ],
        };
        self.notify(&format!("{TASK_NOTIFICATION_PREFIX}{task_id}"), notification)
            .await;
        Ok(())
    }

    async fn show_daily_summary(&self) -> Result<(), AppError> {
        let tasks = self.store.get_tasks().await?;
        let (start, end) = local_day_bounds(Local::now());

        let today_tasks: Vec<&Task> = tasks
            .iter()
            .filter(|task| !task.completed && task.due_date >= start && task.due_date < end)
            .collect();
        // 今日のタスクが無い日はサマリー自体を出さない
        if today_tasks.is_empty() {
            return Ok(());
        }

        let items = today_tasks
            .iter()
            .take(DAILY_SUMMARY_MAX_ITEMS)
            .map(|task| NotificationItem {
                title: task.title.clone(),
                message: task.description.clone().unwrap_or_default(),
            })
            .collect();
        let notification = Notification {
            title: "今日のタスク".to_string(),
            message: format!("{}件のタスクがあります", today_tasks.len()),
            priority: 0,
            kind: NotificationKind::List { items },
            buttons: Vec::new(),
        };
        self.notify(DAILY_SUMMARY_ALARM, notification).await;
        Ok(())
    }

    async fn show_weekly_review(&self) -> Result<(), AppError> {
        let tasks = self.store.get_tasks().await?;
        let week_ago = Utc::now() - Duration::days(7);

        let completed = tasks
            .iter()
            .filter(|task| task.completed && task.updated_at >= week_ago)
            .count();
        let pending = tasks.iter().filter(|task| !task.completed).count();

        // 週次レビューは両方 0 件でも必ず表示する
        let notification = Notification {
            title: "週次レビュー".to_string(),
            message: format!(
                "今週は{completed}件のタスクを完了しました。残り{pending}件のタスクがあります。"
            ),
            priority: 0,
            kind: NotificationKind::Basic,
            buttons: Vec::new(),
        };
        self.notify(WEEKLY_REVIEW_ALARM, notification).await;
        Ok(())
    }

    /// 通知ボタン押下の処理
    pub async fn handle_notification_action(
        &self,
        notification_id: &str,
        button_index: usize,
    ) -> Result<(), AppError> {
        if let Some(task_id) = notification_id.strip_prefix(TASK_NOTIFICATION_PREFIX) {
            match button_index {
                0 => self.complete_task(task_id).await?,
                1 => {
                    // スヌーズ: 保存済みの reminder.time は変更しない
                    self.alarms
                        .create(
                            &task_reminder_alarm(task_id),
                            AlarmSchedule::After(Duration::minutes(SNOOZE_DELAY_MINUTES)),
                        )
                        .await?;
                }
                other => debug!(
                    "Ignoring unknown button {} on notification {}",
                    other, notification_id
                ),
            }
        }

        // どのボタンでも表示中の通知は閉じる
        if let Err(err) = self.notifier.clear(notification_id).await {
            warn!("Failed to clear notification {}: {:?}", notification_id, err);
        }
        Ok(())
    }

    /// タスクを完了にする。保存がストア変更として流れ、
    /// 次の reconcile がアラームを取り除く
    async fn complete_task(&self, task_id: &str) -> Result<(), AppError> {
        let mut tasks = self.store.get_tasks().await?;
        let Some(task) = tasks.iter_mut().find(|task| task.id == task_id) else {
            return Ok(());
        };
        task.completed = true;
        task.updated_at = Utc::now();
        self.store.save_tasks(&tasks).await
    }

    /// 通知の失敗はログに残すだけで処理は続行する
    async fn notify(&self, id: &str, notification: Notification) {
        if let Err(err) = self.notifier.create(id, notification).await {
            warn!("Failed to show notification {}: {:?}", id, err);
        }
    }
}
