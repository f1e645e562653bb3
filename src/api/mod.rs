use std::collections::HashMap;

use axum::Json;
use axum::extract::{Path, Query};
use axum::routing::{patch, post};
use axum::{Router, extract::State, http::StatusCode, routing::get};
use chrono::{Datelike, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::*;
use crate::notify::Notification;
use crate::state::AppState;
use crate::utils::date::month_calendar_days;

#[derive(Deserialize)]
struct TaskQueryParams {
    /// all | completed | pending
    status: Option<String>,
    category: Option<String>,
    /// high | medium | low
    priority: Option<String>,
}

#[derive(Deserialize)]
struct CalendarQueryParams {
    year: i32,
    month: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CalendarDay {
    date: NaiveDate,
    tasks: Vec<Task>,
    is_today: bool,
    is_current_month: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/{id}", patch(update_task).delete(delete_task))
        .route("/tasks/{id}/toggle", patch(toggle_task))
        .route("/categories", get(list_categories).post(create_category))
        .route(
            "/categories/{id}",
            patch(update_category).delete(delete_category),
        )
        .route("/settings", get(get_settings).put(update_settings))
        .route("/calendar", get(calendar))
        .route("/notifications", get(list_notifications))
        .route(
            "/notifications/{id}/actions/{index}",
            post(notification_action),
        )
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state.store.ping().await?;
    Ok(StatusCode::OK)
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<TaskQueryParams>,
) -> Result<Json<Vec<Task>>, AppError> {
    let tasks = state.store.get_tasks().await?;
    let tasks = tasks
        .into_iter()
        .filter(|task| {
            let status_ok = match params.status.as_deref() {
                Some("completed") => task.completed,
                Some("pending") => !task.completed,
                _ => true,
            };
            let category_ok = params
                .category
                .as_deref()
                .is_none_or(|category| task.category == category);
            let priority_ok = params
                .priority
                .as_deref()
                .is_none_or(|priority| task.priority.as_str() == priority);
            status_ok && category_ok && priority_ok
        })
        .collect();
    Ok(Json(tasks))
}

async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<NewTaskRequest>,
) -> Result<Json<Task>, AppError> {
    let now = Utc::now();
    let task = Task {
        id: Uuid::new_v4().to_string(),
        title: req.title,
        description: req.description,
        due_date: req.due_date,
        priority: req.priority,
        category: req.category,
        completed: false,
        created_at: now,
        updated_at: now,
        reminder: req.reminder,
        recurrence: req.recurrence,
    };

    let mut tasks = state.store.get_tasks().await?;
    tasks.push(task.clone());
    state.store.save_tasks(&tasks).await?;
    Ok(Json(task))
}

async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<Json<Task>, AppError> {
    let mut tasks = state.store.get_tasks().await?;
    let task = tasks
        .iter_mut()
        .find(|task| task.id == id)
        .ok_or(AppError::NotFound)?;

    if let Some(title) = req.title {
        task.title = title;
    }
    if let Some(description) = req.description {
        task.description = Some(description);
    }
    if let Some(due_date) = req.due_date {
        task.due_date = due_date;
    }
    if let Some(priority) = req.priority {
        task.priority = priority;
    }
    if let Some(category) = req.category {
        task.category = category;
    }
    if let Some(completed) = req.completed {
        task.completed = completed;
    }
    if let Some(reminder) = req.reminder {
        task.reminder = Some(reminder);
    }
    if let Some(recurrence) = req.recurrence {
        task.recurrence = Some(recurrence);
    }
    task.updated_at = Utc::now();

    let updated = task.clone();
    state.store.save_tasks(&tasks).await?;
    Ok(Json(updated))
}

async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let mut tasks = state.store.get_tasks().await?;
    let before = tasks.len();
    tasks.retain(|task| task.id != id);
    if tasks.len() == before {
        return Err(AppError::NotFound);
    }
    state.store.save_tasks(&tasks).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, AppError> {
    let mut tasks = state.store.get_tasks().await?;
    let task = tasks
        .iter_mut()
        .find(|task| task.id == id)
        .ok_or(AppError::NotFound)?;

    task.completed = !task.completed;
    task.updated_at = Utc::now();

    let updated = task.clone();
    state.store.save_tasks(&tasks).await?;
    Ok(Json(updated))
}

async fn list_categories(State(state): State<AppState>) -> Result<Json<Vec<Category>>, AppError> {
    let categories = state.store.get_categories().await?;
    Ok(Json(categories))
}

async fn create_category(
    State(state): State<AppState>,
    Json(req): Json<NewCategoryRequest>,
) -> Result<Json<Category>, AppError> {
    let category = Category {
        id: Uuid::new_v4().to_string(),
        name: req.name,
        color: req.color,
        icon: req.icon,
        is_default: req.is_default,
    };

    let mut categories = state.store.get_categories().await?;
    categories.push(category.clone());
    state.store.save_categories(&categories).await?;
    Ok(Json(category))
}

async fn update_category(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateCategoryRequest>,
) -> Result<Json<Category>, AppError> {
    let mut categories = state.store.get_categories().await?;
    let category = categories
        .iter_mut()
        .find(|category| category.id == id)
        .ok_or(AppError::NotFound)?;

    if let Some(name) = req.name {
        category.name = name;
    }
    if let Some(color) = req.color {
        category.color = color;
    }
    if let Some(icon) = req.icon {
        category.icon = Some(icon);
    }
    if let Some(is_default) = req.is_default {
        category.is_default = is_default;
    }

    let updated = category.clone();
    state.store.save_categories(&categories).await?;
    Ok(Json(updated))
}

/// カテゴリ削除。タスク側の参照は張り替えない (ぶら下がり参照は許容)
async fn delete_category(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let mut categories = state.store.get_categories().await?;
    let before = categories.len();
    categories.retain(|category| category.id != id);
    if categories.len() == before {
        return Err(AppError::NotFound);
    }
    state.store.save_categories(&categories).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_settings(State(state): State<AppState>) -> Result<Json<Settings>, AppError> {
    let settings = state.store.get_settings().await?;
    Ok(Json(settings))
}

async fn update_settings(
    State(state): State<AppState>,
    Json(req): Json<UpdateSettingsRequest>,
) -> Result<Json<Settings>, AppError> {
    let mut settings = state.store.get_settings().await?;
    if let Some(theme) = req.theme {
        settings.theme = theme;
    }
    if let Some(notifications) = req.notifications {
        settings.notifications = notifications;
    }
    if let Some(sync) = req.sync {
        settings.sync = sync;
    }
    state.store.save_settings(&settings).await?;
    Ok(Json(settings))
}

async fn calendar(
    State(state): State<AppState>,
    Query(params): Query<CalendarQueryParams>,
) -> Result<Json<Vec<CalendarDay>>, AppError> {
    let days = month_calendar_days(params.year, params.month).ok_or_else(|| {
        AppError::BadRequest(format!("Invalid month: {}-{}", params.year, params.month))
    })?;

    let tasks = state.store.get_tasks().await?;
    let today = Local::now().date_naive();

    let grid = days
        .into_iter()
        .map(|date| {
            let day_tasks = tasks
                .iter()
                .filter(|task| task.due_date.with_timezone(&Local).date_naive() == date)
                .cloned()
                .collect();
            CalendarDay {
                date,
                tasks: day_tasks,
                is_today: date == today,
                is_current_month: date.month() == params.month,
            }
        })
        .collect();
    Ok(Json(grid))
}

async fn list_notifications(State(state): State<AppState>) -> Json<HashMap<String, Notification>> {
    Json(state.notifier.active().await)
}

/// 通知ボタン押下の入口。index は表示順 (0: 完了, 1: スヌーズ)
async fn notification_action(
    State(state): State<AppState>,
    Path((id, index)): Path<(String, usize)>,
) -> Result<StatusCode, AppError> {
    state
        .scheduler
        .handle_notification_action(&id, index)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
