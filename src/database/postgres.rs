//! # PostgreSQL Store
//!
//! Transactional store backed by sqlx. A task is persisted as one `tasks` row
//! plus its ordered `task_messages` rows; both are rewritten inside the same
//! transaction on every update.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

use super::errors::{StorageError, StorageResult};
use super::unit_of_work::{StoreSession, TaskFilter, TransactionalStore};
use crate::models::{AuditInfo, Configuration, Message, Task};
use crate::state_machine::ResourceStatus;

/// Store over a PostgreSQL connection pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply bundled schema migrations
    pub async fn migrate(&self) -> StorageResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::query("migrate", e.to_string()))?;
        info!("🗄️ STORE: Schema migrations applied");
        Ok(())
    }
}

#[async_trait]
impl TransactionalStore for PgStore {
    async fn begin(&self) -> StorageResult<Box<dyn StoreSession>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Begin(e.to_string()))?;
        Ok(Box::new(PgSession { tx }))
    }
}

struct PgSession {
    tx: Transaction<'static, Postgres>,
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    tenant_id: Uuid,
    public_id: i64,
    configuration_id: Uuid,
    remote_session_id: Option<String>,
    remote_thread_id: Option<String>,
    status: i16,
    last_error: Option<String>,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    created_from_ip: Option<String>,
    modified_by: Uuid,
    modified_at: DateTime<Utc>,
    modified_from_ip: Option<String>,
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    task_id: Uuid,
    content: String,
    status: i16,
    from_provider: bool,
    remote_message_id: Option<String>,
    remote_run_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ConfigurationRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    model: String,
    instructions: String,
    temperature: Option<f32>,
    reference_file_ids: Json<Vec<String>>,
    remote_assistant_id: Option<String>,
    status: i16,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    created_from_ip: Option<String>,
    modified_by: Uuid,
    modified_at: DateTime<Utc>,
    modified_from_ip: Option<String>,
}

fn decode_status(code: i16) -> StorageResult<ResourceStatus> {
    ResourceStatus::try_from(code).map_err(StorageError::Corrupt)
}

impl MessageRow {
    fn into_message(self) -> StorageResult<Message> {
        Ok(Message {
            id: self.id,
            content: self.content,
            status: decode_status(self.status)?,
            from_provider: self.from_provider,
            remote_message_id: self.remote_message_id,
            remote_run_id: self.remote_run_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl TaskRow {
    fn into_task(self, messages: Vec<Message>) -> StorageResult<Task> {
        Ok(Task {
            id: self.id,
            tenant_id: self.tenant_id,
            public_id: self.public_id,
            configuration_id: self.configuration_id,
            remote_session_id: self.remote_session_id,
            remote_thread_id: self.remote_thread_id,
            status: decode_status(self.status)?,
            messages,
            last_error: self.last_error,
            audit: AuditInfo {
                created_by: self.created_by,
                created_at: self.created_at,
                created_from_ip: self.created_from_ip,
                modified_by: self.modified_by,
                modified_at: self.modified_at,
                modified_from_ip: self.modified_from_ip,
            },
        })
    }
}

impl ConfigurationRow {
    fn into_configuration(self) -> StorageResult<Configuration> {
        Ok(Configuration {
            id: self.id,
            tenant_id: self.tenant_id,
            name: self.name,
            model: self.model,
            instructions: self.instructions,
            temperature: self.temperature,
            reference_file_ids: self.reference_file_ids.0,
            remote_assistant_id: self.remote_assistant_id,
            status: decode_status(self.status)?,
            audit: AuditInfo {
                created_by: self.created_by,
                created_at: self.created_at,
                created_from_ip: self.created_from_ip,
                modified_by: self.modified_by,
                modified_at: self.modified_at,
                modified_from_ip: self.modified_from_ip,
            },
        })
    }
}

const TASK_COLUMNS: &str = "id, tenant_id, public_id, configuration_id, remote_session_id, \
     remote_thread_id, status, last_error, created_by, created_at, created_from_ip, \
     modified_by, modified_at, modified_from_ip";

impl PgSession {
    async fn write_messages(&mut self, task: &Task) -> StorageResult<()> {
        sqlx::query("DELETE FROM task_messages WHERE task_id = $1")
            .bind(task.id)
            .execute(&mut *self.tx)
            .await
            .map_err(StorageError::from_sqlx("delete_messages"))?;

        for (position, message) in task.messages.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO task_messages (
                    id, task_id, position, content, status, from_provider,
                    remote_message_id, remote_run_id, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(message.id)
            .bind(task.id)
            .bind(position as i32)
            .bind(&message.content)
            .bind(message.status.code())
            .bind(message.from_provider)
            .bind(&message.remote_message_id)
            .bind(&message.remote_run_id)
            .bind(message.created_at)
            .bind(message.updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(StorageError::from_sqlx("insert_message"))?;
        }
        Ok(())
    }

    /// Load messages for a set of tasks, grouped by task in position order
    async fn load_messages(
        &mut self,
        task_ids: &[Uuid],
    ) -> StorageResult<HashMap<Uuid, Vec<Message>>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, task_id, content, status, from_provider,
                   remote_message_id, remote_run_id, created_at, updated_at
            FROM task_messages
            WHERE task_id = ANY($1)
            ORDER BY task_id, position
            "#,
        )
        .bind(task_ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(StorageError::from_sqlx("load_messages"))?;

        let mut grouped: HashMap<Uuid, Vec<Message>> = HashMap::new();
        for row in rows {
            let task_id = row.task_id;
            grouped.entry(task_id).or_default().push(row.into_message()?);
        }
        Ok(grouped)
    }

    async fn hydrate(&mut self, rows: Vec<TaskRow>) -> StorageResult<Vec<Task>> {
        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let mut messages = self.load_messages(&ids).await?;
        rows.into_iter()
            .map(|row| {
                let task_messages = messages.remove(&row.id).unwrap_or_default();
                row.into_task(task_messages)
            })
            .collect()
    }
}

#[async_trait]
impl StoreSession for PgSession {
    async fn create_task(&mut self, task: &Task) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO tasks (
                id, tenant_id, public_id, configuration_id, remote_session_id,
                remote_thread_id, status, last_error, created_by, created_at,
                created_from_ip, modified_by, modified_at, modified_from_ip
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(task.id)
        .bind(task.tenant_id)
        .bind(task.public_id)
        .bind(task.configuration_id)
        .bind(&task.remote_session_id)
        .bind(&task.remote_thread_id)
        .bind(task.status.code())
        .bind(&task.last_error)
        .bind(task.audit.created_by)
        .bind(task.audit.created_at)
        .bind(&task.audit.created_from_ip)
        .bind(task.audit.modified_by)
        .bind(task.audit.modified_at)
        .bind(&task.audit.modified_from_ip)
        .execute(&mut *self.tx)
        .await
        .map_err(StorageError::from_sqlx("create_task"))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Duplicate {
                entity: "task",
                id: task.id,
            });
        }
        self.write_messages(task).await
    }

    async fn get_task(&mut self, task_id: Uuid) -> StorageResult<Option<Task>> {
        let row: Option<TaskRow> =
            sqlx::query_as(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
                .bind(task_id)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(StorageError::from_sqlx("get_task"))?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn update_task(&mut self, task: &Task) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET remote_session_id = $2,
                remote_thread_id = $3,
                status = $4,
                last_error = $5,
                modified_by = $6,
                modified_at = $7,
                modified_from_ip = $8
            WHERE id = $1
            "#,
        )
        .bind(task.id)
        .bind(&task.remote_session_id)
        .bind(&task.remote_thread_id)
        .bind(task.status.code())
        .bind(&task.last_error)
        .bind(task.audit.modified_by)
        .bind(task.audit.modified_at)
        .bind(&task.audit.modified_from_ip)
        .execute(&mut *self.tx)
        .await
        .map_err(StorageError::from_sqlx("update_task"))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Missing {
                entity: "task",
                id: task.id,
            });
        }
        self.write_messages(task).await
    }

    async fn delete_task(&mut self, task_id: Uuid) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(task_id)
            .execute(&mut *self.tx)
            .await
            .map_err(StorageError::from_sqlx("delete_task"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_tasks(&mut self, filter: &TaskFilter) -> StorageResult<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            r#"
            SELECT {TASK_COLUMNS}
            FROM tasks
            WHERE tenant_id = $1 AND ($2::SMALLINT IS NULL OR status = $2)
            ORDER BY public_id
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(filter.tenant_id)
        .bind(filter.status.map(|status| status.code()))
        .bind(filter.limit.map(|limit| limit as i64))
        .bind(filter.offset as i64)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(StorageError::from_sqlx("list_tasks"))?;

        self.hydrate(rows).await
    }

    async fn max_public_id(&mut self, tenant_id: Uuid) -> StorageResult<i64> {
        let max: Option<i64> =
            sqlx::query_scalar("SELECT MAX(public_id) FROM tasks WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_one(&mut *self.tx)
                .await
                .map_err(StorageError::from_sqlx("max_public_id"))?;
        Ok(max.unwrap_or(0))
    }

    async fn create_configuration(&mut self, configuration: &Configuration) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO configurations (
                id, tenant_id, name, model, instructions, temperature,
                reference_file_ids, remote_assistant_id, status, created_by,
                created_at, created_from_ip, modified_by, modified_at, modified_from_ip
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(configuration.id)
        .bind(configuration.tenant_id)
        .bind(&configuration.name)
        .bind(&configuration.model)
        .bind(&configuration.instructions)
        .bind(configuration.temperature)
        .bind(Json(&configuration.reference_file_ids))
        .bind(&configuration.remote_assistant_id)
        .bind(configuration.status.code())
        .bind(configuration.audit.created_by)
        .bind(configuration.audit.created_at)
        .bind(&configuration.audit.created_from_ip)
        .bind(configuration.audit.modified_by)
        .bind(configuration.audit.modified_at)
        .bind(&configuration.audit.modified_from_ip)
        .execute(&mut *self.tx)
        .await
        .map_err(StorageError::from_sqlx("create_configuration"))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Duplicate {
                entity: "configuration",
                id: configuration.id,
            });
        }
        Ok(())
    }

    async fn get_configuration(
        &mut self,
        configuration_id: Uuid,
    ) -> StorageResult<Option<Configuration>> {
        let row: Option<ConfigurationRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, name, model, instructions, temperature,
                   reference_file_ids, remote_assistant_id, status, created_by,
                   created_at, created_from_ip, modified_by, modified_at, modified_from_ip
            FROM configurations
            WHERE id = $1
            "#,
        )
        .bind(configuration_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(StorageError::from_sqlx("get_configuration"))?;

        row.map(ConfigurationRow::into_configuration).transpose()
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| StorageError::Commit(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| StorageError::Rollback(e.to_string()))
    }
}
