use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use tokio::sync::mpsc;

use caltodo::alarms::{Alarm, AlarmSchedule, AlarmService, TokioAlarmService};
use caltodo::db::Store;
use caltodo::error::AppError;
use caltodo::models::{Priority, Reminder, Settings, Task};
use caltodo::notify::{
    InMemoryNotifier, NoopNotifier, Notification, NotificationKind, Notifier,
};
use caltodo::services::ReminderScheduler;

async fn test_store() -> Store {
    let pool = SqlitePool::connect("sqlite::memory:")
        .await
        .expect("Failed to create database");

    sqlx::query(
        r#"
        CREATE TABLE storage (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await
    .expect("Failed to create storage table");

    let store = Store::new(pool);
    store.init_defaults().await.expect("Failed to seed defaults");
    store
}

fn make_task(id: &str, reminder: Option<Reminder>) -> Task {
    let now = Utc::now();
    Task {
        id: id.to_string(),
        title: format!("Task {}", id),
        description: None,
        due_date: now + Duration::hours(1),
        priority: Priority::Medium,
        category: "1".to_string(),
        completed: false,
        created_at: now,
        updated_at: now,
        reminder,
        recurrence: None,
    }
}

fn future_reminder(minutes: i64) -> Reminder {
    Reminder {
        enabled: true,
        time: Utc::now() + Duration::minutes(minutes),
        notified: false,
    }
}

fn scheduler_with(
    store: Store,
    notifier: Arc<dyn Notifier>,
) -> (
    Arc<ReminderScheduler>,
    Arc<TokioAlarmService>,
    mpsc::UnboundedReceiver<String>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let alarms = Arc::new(TokioAlarmService::new(tx));
    let scheduler = Arc::new(ReminderScheduler::new(store, alarms.clone(), notifier));
    (scheduler, alarms, rx)
}

fn find_alarm(all: &[Alarm], name: &str) -> Option<Alarm> {
    all.iter().find(|alarm| alarm.name == name).cloned()
}

#[tokio::test]
async fn test_reconcile_creates_alarm_for_future_reminder() {
    let store = test_store().await;
    let (scheduler, alarms, _rx) = scheduler_with(store, Arc::new(NoopNotifier));

    let reminder = future_reminder(10);
    let reminder_time = reminder.time;
    let tasks = vec![make_task("t1", Some(reminder))];

    scheduler
        .reconcile_task_alarms(&tasks)
        .await
        .expect("reconcile failed");

    let all = alarms.get_all().await.expect("get_all failed");
    assert_eq!(all.len(), 1);
    let alarm = find_alarm(&all, "task-reminder-t1").expect("alarm missing");
    assert_eq!(alarm.fire_at, reminder_time);
    assert!(alarm.period.is_none());
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let store = test_store().await;
    let (scheduler, alarms, _rx) = scheduler_with(store, Arc::new(NoopNotifier));

    let tasks = vec![
        make_task("t1", Some(future_reminder(10))),
        make_task("t2", Some(future_reminder(20))),
    ];

    scheduler
        .reconcile_task_alarms(&tasks)
        .await
        .expect("first reconcile failed");
    let first = alarms.get_all().await.expect("get_all failed");

    scheduler
        .reconcile_task_alarms(&tasks)
        .await
        .expect("second reconcile failed");
    let second = alarms.get_all().await.expect("get_all failed");

    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 2);
    for alarm in &first {
        let again = find_alarm(&second, &alarm.name).expect("alarm lost on second reconcile");
        assert_eq!(again.fire_at, alarm.fire_at);
    }
}

#[tokio::test]
async fn test_reconcile_skips_ineligible_tasks() {
    let store = test_store().await;
    let (scheduler, alarms, _rx) = scheduler_with(store, Arc::new(NoopNotifier));

    // 過去のリマインダー
    let past = Reminder {
        enabled: true,
        time: Utc::now() - Duration::minutes(5),
        notified: false,
    };
    // 無効化されたリマインダー
    let disabled = Reminder {
        enabled: false,
        time: Utc::now() + Duration::minutes(30),
        notified: false,
    };
    // 完了済みタスクの有効なリマインダー
    let mut completed = make_task("t3", Some(future_reminder(30)));
    completed.completed = true;

    let tasks = vec![
        make_task("t1", Some(past)),
        make_task("t2", Some(disabled)),
        completed,
        make_task("t4", None),
    ];

    scheduler
        .reconcile_task_alarms(&tasks)
        .await
        .expect("reconcile failed");

    assert!(alarms.get_all().await.expect("get_all failed").is_empty());
}

#[tokio::test]
async fn test_reconcile_removes_stale_alarms_but_keeps_periodic() {
    let store = test_store().await;
    let (scheduler, alarms, _rx) = scheduler_with(store, Arc::new(NoopNotifier));

    // 日次サマリーの定期アラームを先に作る (デフォルト設定で有効)
    scheduler
        .apply_notification_settings(&Settings::default())
        .await
        .expect("apply settings failed");

    scheduler
        .reconcile_task_alarms(&[make_task("t1", Some(future_reminder(10)))])
        .await
        .expect("reconcile failed");
    let all = alarms.get_all().await.expect("get_all failed");
    assert!(find_alarm(&all, "task-reminder-t1").is_some());

    // タスクが消えたらリマインダーのアラームも消えるが、定期アラームは残る
    scheduler
        .reconcile_task_alarms(&[])
        .await
        .expect("reconcile failed");
    let all = alarms.get_all().await.expect("get_all failed");
    assert!(find_alarm(&all, "task-reminder-t1").is_none());
    assert!(find_alarm(&all, "daily-summary").is_some());
}

#[tokio::test]
async fn test_apply_settings_creates_and_clears_periodic_alarms() {
    let store = test_store().await;
    let (scheduler, alarms, _rx) = scheduler_with(store, Arc::new(NoopNotifier));

    // デフォルト: dailySummary 有効 / weeklyReview 無効
    let mut settings = Settings::default();
    scheduler
        .apply_notification_settings(&settings)
        .await
        .expect("apply settings failed");

    let all = alarms.get_all().await.expect("get_all failed");
    let daily = find_alarm(&all, "daily-summary").expect("daily-summary missing");
    assert_eq!(daily.period, Some(Duration::minutes(24 * 60)));
    assert!(daily.fire_at > Utc::now());
    assert!(find_alarm(&all, "weekly-review").is_none());

    // weeklyReview を有効化
    settings.notifications.weekly_review = true;
    scheduler
        .apply_notification_settings(&settings)
        .await
        .expect("apply settings failed");

    let all = alarms.get_all().await.expect("get_all failed");
    let weekly = find_alarm(&all, "weekly-review").expect("weekly-review missing");
    assert_eq!(weekly.period, Some(Duration::minutes(7 * 24 * 60)));
    assert!(weekly.fire_at > Utc::now());
    // 初回発火はローカルの月曜 09:00
    let local_fire = weekly.fire_at.with_timezone(&chrono::Local);
    assert_eq!(local_fire.format("%H:%M").to_string(), "09:00");
    assert_eq!(
        chrono::Datelike::weekday(&local_fire),
        chrono::Weekday::Mon
    );

    // 両方無効化すると両方消える
    settings.notifications.daily_summary = false;
    settings.notifications.weekly_review = false;
    scheduler
        .apply_notification_settings(&settings)
        .await
        .expect("apply settings failed");
    assert!(alarms.get_all().await.expect("get_all failed").is_empty());
}

#[tokio::test]
async fn test_task_reminder_fire_and_complete_action() {
    let store = test_store().await;
    let notifier = Arc::new(InMemoryNotifier::new());
    let (scheduler, _alarms, _rx) = scheduler_with(store.clone(), notifier.clone());

    let mut task = make_task("t1", Some(future_reminder(10)));
    task.priority = Priority::High;
    store.save_tasks(&[task]).await.expect("save failed");

    scheduler
        .handle_alarm("task-reminder-t1")
        .await
        .expect("handle_alarm failed");

    let active = notifier.active().await;
    let notification = active.get("task-t1").expect("notification missing");
    assert_eq!(notification.title, "タスクリマインダー");
    assert_eq!(notification.message, "Task t1");
    assert_eq!(notification.priority, 2);
    assert_eq!(notification.buttons.len(), 2);

    // ボタン 0: 完了にする
    let before = Utc::now();
    scheduler
        .handle_notification_action("task-t1", 0)
        .await
        .expect("action failed");

    let tasks = store.get_tasks().await.expect("get_tasks failed");
    assert!(tasks[0].completed);
    assert!(tasks[0].updated_at >= before);

    // 応答後は通知が閉じられている
    assert!(notifier.active().await.is_empty());
}

#[tokio::test]
async fn test_task_reminder_suppressed_for_missing_or_completed() {
    let store = test_store().await;
    let notifier = Arc::new(InMemoryNotifier::new());
    let (scheduler, _alarms, _rx) = scheduler_with(store.clone(), notifier.clone());

    let mut task = make_task("t1", Some(future_reminder(10)));
    task.completed = true;
    store.save_tasks(&[task]).await.expect("save failed");

    scheduler
        .handle_alarm("task-reminder-t1")
        .await
        .expect("handle_alarm failed");
    scheduler
        .handle_alarm("task-reminder-unknown")
        .await
        .expect("handle_alarm failed");

    assert!(notifier.active().await.is_empty());
}

#[tokio::test]
async fn test_snooze_reschedules_without_touching_reminder() {
    let store = test_store().await;
    let notifier = Arc::new(InMemoryNotifier::new());
    let (scheduler, alarms, _rx) = scheduler_with(store.clone(), notifier.clone());

    let reminder = future_reminder(10);
    let original_time = reminder.time;
    store
        .save_tasks(&[make_task("t3", Some(reminder))])
        .await
        .expect("save failed");

    scheduler
        .handle_alarm("task-reminder-t3")
        .await
        .expect("handle_alarm failed");
    assert!(notifier.active().await.contains_key("task-t3"));

    // ボタン 1: 15 分後にスヌーズ
    scheduler
        .handle_notification_action("task-t3", 1)
        .await
        .expect("action failed");

    let all = alarms.get_all().await.expect("get_all failed");
    let alarm = find_alarm(&all, "task-reminder-t3").expect("snooze alarm missing");
    assert!(alarm.fire_at > Utc::now() + Duration::minutes(14));
    assert!(alarm.fire_at <= Utc::now() + Duration::minutes(15));
    assert!(alarm.period.is_none());

    // 保存されている reminder.time は変わらない
    let tasks = store.get_tasks().await.expect("get_tasks failed");
    let stored = tasks[0].reminder.as_ref().expect("reminder missing");
    assert_eq!(stored.time, original_time);
    assert!(!tasks[0].completed);

    // スヌーズでも通知は閉じられる
    assert!(notifier.active().await.is_empty());
}

#[tokio::test]
async fn test_daily_summary_lists_due_today() {
    let store = test_store().await;
    let notifier = Arc::new(InMemoryNotifier::new());
    let (scheduler, _alarms, _rx) = scheduler_with(store.clone(), notifier.clone());

    let mut today = make_task("t1", None);
    today.due_date = Utc::now();
    today.description = Some("買い出しリスト".to_string());

    let mut later = make_task("t2", None);
    later.due_date = Utc::now() + Duration::days(2);

    let mut done = make_task("t3", None);
    done.due_date = Utc::now();
    done.completed = true;

    store
        .save_tasks(&[today, later, done])
        .await
        .expect("save failed");

    scheduler
        .handle_alarm("daily-summary")
        .await
        .expect("handle_alarm failed");

    let active = notifier.active().await;
    let notification = active.get("daily-summary").expect("summary missing");
    assert_eq!(notification.title, "今日のタスク");
    assert_eq!(notification.message, "1件のタスクがあります");
    match &notification.kind {
        NotificationKind::List { items } => {
            assert_eq!(items.len(), 1);
            assert_eq!(items[0].title, "Task t1");
            assert_eq!(items[0].message, "買い出しリスト");
        }
        NotificationKind::Basic => panic!("expected list notification"),
    }
}

#[tokio::test]
async fn test_daily_summary_caps_preview_at_five() {
    let store = test_store().await;
    let notifier = Arc::new(InMemoryNotifier::new());
    let (scheduler, _alarms, _rx) = scheduler_with(store.clone(), notifier.clone());

    let tasks: Vec<Task> = (0..6)
        .map(|i| {
            let mut task = make_task(&format!("t{}", i), None);
            task.due_date = Utc::now();
            task
        })
        .collect();
    store.save_tasks(&tasks).await.expect("save failed");

    scheduler
        .handle_alarm("daily-summary")
        .await
        .expect("handle_alarm failed");

    let active = notifier.active().await;
    let notification = active.get("daily-summary").expect("summary missing");
    assert_eq!(notification.message, "6件のタスクがあります");
    match &notification.kind {
        NotificationKind::List { items } => assert_eq!(items.len(), 5),
        NotificationKind::Basic => panic!("expected list notification"),
    }
}

#[tokio::test]
async fn test_daily_summary_suppressed_when_empty() {
    let store = test_store().await;
    let notifier = Arc::new(InMemoryNotifier::new());
    let (scheduler, _alarms, _rx) = scheduler_with(store.clone(), notifier.clone());

    // 今日が期限のタスクは完了済みのみ
    let mut done = make_task("t1", None);
    done.due_date = Utc::now();
    done.completed = true;
    store.save_tasks(&[done]).await.expect("save failed");

    scheduler
        .handle_alarm("daily-summary")
        .await
        .expect("handle_alarm failed");

    assert!(notifier.active().await.is_empty());
}

#[tokio::test]
async fn test_weekly_review_always_shows() {
    let store = test_store().await;
    let notifier = Arc::new(InMemoryNotifier::new());
    let (scheduler, _alarms, _rx) = scheduler_with(store.clone(), notifier.clone());

    // タスクが一件も無くても表示される
    scheduler
        .handle_alarm("weekly-review")
        .await
        .expect("handle_alarm failed");
    let active = notifier.active().await;
    let notification = active.get("weekly-review").expect("review missing");
    assert_eq!(
        notification.message,
        "今週は0件のタスクを完了しました。残り0件のタスクがあります。"
    );

    // 直近 7 日で完了 1 件 + 古い完了 1 件 + 未完了 1 件
    let mut recent_done = make_task("t1", None);
    recent_done.completed = true;

    let mut old_done = make_task("t2", None);
    old_done.completed = true;
    old_done.updated_at = Utc::now() - Duration::days(8);

    let pending = make_task("t3", None);

    store
        .save_tasks(&[recent_done, old_done, pending])
        .await
        .expect("save failed");

    scheduler
        .handle_alarm("weekly-review")
        .await
        .expect("handle_alarm failed");
    let active = notifier.active().await;
    let notification = active.get("weekly-review").expect("review missing");
    assert_eq!(
        notification.message,
        "今週は1件のタスクを完了しました。残り1件のタスクがあります。"
    );
}

#[tokio::test]
async fn test_event_loop_reconciles_on_store_change() {
    let store = test_store().await;
    let (scheduler, alarms, rx) = scheduler_with(store.clone(), Arc::new(NoopNotifier));

    let loop_task = tokio::spawn(scheduler.clone().run(rx));
    // ループが購読を開始するまで待つ
    tokio::time::sleep(StdDuration::from_millis(100)).await;

    store
        .save_tasks(&[make_task("t1", Some(future_reminder(10)))])
        .await
        .expect("save failed");
    tokio::time::sleep(StdDuration::from_millis(200)).await;

    let all = alarms.get_all().await.expect("get_all failed");
    assert!(find_alarm(&all, "task-reminder-t1").is_some());

    store.save_tasks(&[]).await.expect("save failed");
    tokio::time::sleep(StdDuration::from_millis(200)).await;

    assert!(alarms.get_all().await.expect("get_all failed").is_empty());

    loop_task.abort();
}

#[tokio::test]
async fn test_alarm_fires_through_channel() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let alarms = TokioAlarmService::new(tx);

    alarms
        .create(
            "task-reminder-x",
            AlarmSchedule::At(Utc::now() + Duration::milliseconds(200)),
        )
        .await
        .expect("create failed");

    let fired = tokio::time::timeout(StdDuration::from_secs(2), rx.recv())
        .await
        .expect("alarm did not fire")
        .expect("channel closed");
    assert_eq!(fired, "task-reminder-x");

    // 一回きりのアラームは発火後に消える
    tokio::time::sleep(StdDuration::from_millis(100)).await;
    assert!(alarms.get_all().await.expect("get_all failed").is_empty());
}

#[tokio::test]
async fn test_periodic_alarm_rearms() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let alarms = TokioAlarmService::new(tx);

    alarms
        .create(
            "daily-summary",
            AlarmSchedule::Periodic {
                first: Utc::now() + Duration::milliseconds(100),
                every: Duration::milliseconds(200),
            },
        )
        .await
        .expect("create failed");

    for _ in 0..2 {
        let fired = tokio::time::timeout(StdDuration::from_secs(2), rx.recv())
            .await
            .expect("alarm did not fire")
            .expect("channel closed");
        assert_eq!(fired, "daily-summary");
    }

    // 定期アラームは発火後も残る
    assert!(
        alarms
            .get_all()
            .await
            .expect("get_all failed")
            .iter()
            .any(|alarm| alarm.name == "daily-summary")
    );
}

#[tokio::test]
async fn test_create_replaces_existing_alarm() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let alarms = TokioAlarmService::new(tx);

    let first = Utc::now() + Duration::minutes(10);
    let second = Utc::now() + Duration::minutes(30);

    alarms
        .create("task-reminder-t1", AlarmSchedule::At(first))
        .await
        .expect("create failed");
    alarms
        .create("task-reminder-t1", AlarmSchedule::At(second))
        .await
        .expect("create failed");

    let all = alarms.get_all().await.expect("get_all failed");
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].fire_at, second);
}

struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn create(&self, _id: &str, _notification: Notification) -> Result<(), AppError> {
        Err(AppError::InternalServerError)
    }

    async fn clear(&self, _id: &str) -> Result<bool, AppError> {
        Err(AppError::InternalServerError)
    }
}

#[tokio::test]
async fn test_notifier_failure_degrades_without_error() {
    let store = test_store().await;
    let (scheduler, _alarms, _rx) = scheduler_with(store.clone(), Arc::new(FailingNotifier));

    store
        .save_tasks(&[make_task("t1", Some(future_reminder(10)))])
        .await
        .expect("save failed");

    // 通知が失敗してもハンドラはエラーにならない
    scheduler
        .handle_alarm("task-reminder-t1")
        .await
        .expect("handle_alarm should not fail");
    scheduler
        .handle_notification_action("task-t1", 0)
        .await
        .expect("action should not fail");

    // タスクの保存は通知とは独立して成功している
    let tasks = store.get_tasks().await.expect("get_tasks failed");
    assert!(tasks[0].completed);
}
