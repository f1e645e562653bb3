use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use caltodo::alarms::TokioAlarmService;
use caltodo::api::router;
use caltodo::db::Store;
use caltodo::notify::InMemoryNotifier;
use caltodo::services::ReminderScheduler;
use caltodo::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "caltodo=debug".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite://caltodo.db".to_string());

    let options = SqliteConnectOptions::from_str(&database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let store = Store::new(pool);
    store.init_defaults().await?;

    let (fired_tx, fired_rx) = mpsc::unbounded_channel();
    let alarms = Arc::new(TokioAlarmService::new(fired_tx));
    let notifier = Arc::new(InMemoryNotifier::new());

    let scheduler = Arc::new(ReminderScheduler::new(
        store.clone(),
        alarms,
        notifier.clone(),
    ));
    // アラームはプロセススコープなので起動時に一度作り直す
    scheduler.bootstrap().await?;
    tokio::spawn(scheduler.clone().run(fired_rx));

    let state = AppState {
        store,
        scheduler,
        notifier,
    };
    let app = router(state);

    let port = std::env::var("PORT")
        .ok()
        .and_then(|port| port.parse().ok())
        .unwrap_or(3000);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
