pub mod routes;

use axum::Router;
use sqlx::SqlitePool;
use std::sync::Arc;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl AppState {
    pub fn new(db: SqlitePool) -> Self {
        Self { db: Arc::new(db) }
    }
}

/// The full application with its state attached.
pub fn app(state: AppState) -> Router {
    routes::routes().with_state(state)
}
