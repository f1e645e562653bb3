use std::sync::Arc;

use crate::db::Store;
use crate::notify::InMemoryNotifier;
use crate::services::ReminderScheduler;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub scheduler: Arc<ReminderScheduler>,
    pub notifier: Arc<InMemoryNotifier>,
}
