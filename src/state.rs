use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PoolError, PooledConnection},
};

use crate::{
    auth::jwt::JwtService,
    config::AppConfig,
    db::PgPool,
    error::{AppError, AppResult},
    notify::Notifier,
    storage::ObjectStorage,
};

pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn ObjectStorage>,
    pub notifier: Arc<dyn Notifier>,
    pub jwt: JwtService,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        storage: Arc<dyn ObjectStorage>,
        notifier: Arc<dyn Notifier>,
        jwt: JwtService,
    ) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            storage,
            notifier,
            jwt,
        }
    }

    pub fn pooled(&self) -> Result<PgPooledConnection, PoolError> {
        self.pool.get()
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pooled()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }
}
