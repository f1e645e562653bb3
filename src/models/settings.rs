use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    System,
}

/// スケジューラーが消費するのは daily_summary と weekly_review のみ
/// enabled / sound は UI 向けの保存値
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    pub enabled: bool,
    pub sound: bool,
    pub daily_summary: bool,
    pub weekly_review: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub theme: Theme,
    pub notifications: NotificationSettings,
    pub sync: SyncSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: Theme::System,
            notifications: NotificationSettings {
                enabled: true,
                sound: true,
                daily_summary: true,
                weekly_review: false,
            },
            sync: SyncSettings {
                enabled: true,
                last_sync_time: None,
            },
        }
    }
}

/// セクション単位のマージ更新 (存在するセクションを丸ごと置き換える)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSettingsRequest {
    pub theme: Option<Theme>,
    pub notifications: Option<NotificationSettings>,
    pub sync: Option<SyncSettings>,
}
