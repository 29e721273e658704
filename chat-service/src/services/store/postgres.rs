//! PostgreSQL-backed store.

use super::ChatStore;
use crate::models::{Chat, Message, ModelEntry, NewMessage};
use crate::services::metrics;
use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::{Duration, Instant};
use tracing::{info, instrument};
use uuid::Uuid;

const CHAT_COLUMNS: &str = "id, user_id, name, is_deleted, created_at, last_updated";
const MESSAGE_COLUMNS: &str = "id, chat_id, role, content, model_id, temperature, created_at";

/// Connection pool wrapper.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new connection pool.
    #[instrument(skip(database_url), fields(service = "chat-service"))]
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

/// Times a query and counts its failures.
fn observe<T>(operation: &str, started: Instant, result: Result<T, sqlx::Error>) -> Result<T, AppError> {
    metrics::record_db_operation(operation, started.elapsed().as_secs_f64());
    result.map_err(|e| {
        metrics::record_db_error(operation);
        tracing::error!(operation, error = %e, "Database query failed");
        AppError::DatabaseError(anyhow::anyhow!("{} failed: {}", operation, e))
    })
}

#[async_trait]
impl ChatStore for PgStore {
    #[instrument(skip(self))]
    async fn create_chat(&self, user_id: Uuid) -> Result<Chat, AppError> {
        let started = Instant::now();
        let result = sqlx::query_as::<_, Chat>(&format!(
            "INSERT INTO chats (id, user_id) VALUES ($1, $2) RETURNING {CHAT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .fetch_one(&self.pool)
        .await;
        observe("create_chat", started, result)
    }

    #[instrument(skip(self))]
    async fn list_chats(&self, user_id: Uuid) -> Result<Vec<Chat>, AppError> {
        let started = Instant::now();
        let result = sqlx::query_as::<_, Chat>(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats \
             WHERE user_id = $1 AND is_deleted = FALSE \
             ORDER BY last_updated DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await;
        observe("list_chats", started, result)
    }

    #[instrument(skip(self))]
    async fn find_chat(&self, chat_id: Uuid) -> Result<Option<Chat>, AppError> {
        let started = Instant::now();
        let result = sqlx::query_as::<_, Chat>(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats WHERE id = $1"
        ))
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await;
        observe("find_chat", started, result)
    }

    #[instrument(skip(self, name))]
    async fn rename_chat(&self, chat_id: Uuid, name: &str) -> Result<(), AppError> {
        let started = Instant::now();
        let result = sqlx::query("UPDATE chats SET name = $2 WHERE id = $1")
            .bind(chat_id)
            .bind(name)
            .execute(&self.pool)
            .await;
        observe("rename_chat", started, result).map(|_| ())
    }

    #[instrument(skip(self))]
    async fn soft_delete_chat(&self, chat_id: Uuid) -> Result<(), AppError> {
        let started = Instant::now();
        let result = sqlx::query("UPDATE chats SET is_deleted = TRUE WHERE id = $1")
            .bind(chat_id)
            .execute(&self.pool)
            .await;
        observe("soft_delete_chat", started, result).map(|_| ())
    }

    #[instrument(skip(self))]
    async fn touch_chat(&self, chat_id: Uuid) -> Result<(), AppError> {
        let started = Instant::now();
        let result = sqlx::query("UPDATE chats SET last_updated = NOW() WHERE id = $1")
            .bind(chat_id)
            .execute(&self.pool)
            .await;
        observe("touch_chat", started, result).map(|_| ())
    }

    #[instrument(skip(self))]
    async fn list_models(&self) -> Result<Vec<ModelEntry>, AppError> {
        let started = Instant::now();
        let result =
            sqlx::query_as::<_, ModelEntry>("SELECT id, name, value FROM models ORDER BY name")
                .fetch_all(&self.pool)
                .await;
        observe("list_models", started, result)
    }

    #[instrument(skip(self))]
    async fn create_model(&self, name: &str, value: &str) -> Result<ModelEntry, AppError> {
        let started = Instant::now();
        let result = sqlx::query_as::<_, ModelEntry>(
            "INSERT INTO models (id, name, value) VALUES ($1, $2, $3) RETURNING id, name, value",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(value)
        .fetch_one(&self.pool)
        .await;

        match result {
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                Err(AppError::Conflict(anyhow::anyhow!(
                    "Model '{}' already exists",
                    value
                )))
            }
            other => observe("create_model", started, other),
        }
    }

    #[instrument(skip(self))]
    async fn find_model(&self, value: &str) -> Result<Option<ModelEntry>, AppError> {
        let started = Instant::now();
        let result =
            sqlx::query_as::<_, ModelEntry>("SELECT id, name, value FROM models WHERE value = $1")
                .bind(value)
                .fetch_optional(&self.pool)
                .await;
        observe("find_model", started, result)
    }

    #[instrument(skip(self, message), fields(chat_id = %message.chat_id, role = %message.role))]
    async fn create_message(&self, message: &NewMessage) -> Result<Message, AppError> {
        let started = Instant::now();
        let result = sqlx::query_as::<_, Message>(&format!(
            "INSERT INTO messages (id, chat_id, role, content, model_id, temperature) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(message.chat_id)
        .bind(message.role)
        .bind(&message.content)
        .bind(message.model_id)
        .bind(message.temperature)
        .fetch_one(&self.pool)
        .await;

        match result {
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_foreign_key_violation() => {
                Err(AppError::NotFound(anyhow::anyhow!("Chat or model not found")))
            }
            other => observe("create_message", started, other),
        }
    }

    #[instrument(skip(self, content), fields(content_len = content.len()))]
    async fn update_message_content(
        &self,
        message_id: Uuid,
        content: &str,
    ) -> Result<(), AppError> {
        let started = Instant::now();
        let result = sqlx::query("UPDATE messages SET content = $2 WHERE id = $1")
            .bind(message_id)
            .bind(content)
            .execute(&self.pool)
            .await;

        let done = observe("update_message_content", started, result)?;
        if done.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!("Message not found")));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_messages(&self, chat_id: Uuid) -> Result<Vec<Message>, AppError> {
        let started = Instant::now();
        let result = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = $1 ORDER BY created_at ASC, seq ASC"
        ))
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await;
        observe("list_messages", started, result)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }
}
