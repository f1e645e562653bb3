pub mod category;
pub mod settings;
pub mod task;

pub use category::{Category, NewCategoryRequest, UpdateCategoryRequest, default_categories};
pub use settings::{NotificationSettings, Settings, SyncSettings, Theme, UpdateSettingsRequest};
pub use task::{
    NewTaskRequest, Priority, Recurrence, RecurrenceType, Reminder, Task, UpdateTaskRequest,
};
