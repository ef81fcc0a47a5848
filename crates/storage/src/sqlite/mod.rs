use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use snafu::{OptionExt, ResultExt};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

use super::error::{
    CreateSqliteDirectorySnafu, InvariantViolationSnafu, NotFoundSnafu, SqliteConnectOptionsSnafu,
    SqliteConnectSnafu, SqliteMigrateSnafu, SqliteQuerySnafu, StorageError, StorageResult,
};
use super::ids::{AgentId, MessageId, SessionId, UserId};
use super::types::{
    AgentRecord, MessageRecord, MessageRole, NewAgent, NewMessage, NewSession, SessionPatch,
    SessionRecord,
};
use super::{AgentStore, BoxFuture, MessageStore, SessionStore};

const SESSION_COLUMNS: &str = "id, agent_id, user_id, title, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, session_id, seq, role, content, created_at";
const AGENT_COLUMNS: &str =
    "id, name, description, system_prompt, model, temperature, max_tokens, created_at";

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    database_url: String,
}

impl SqliteStorage {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        // A single connection keeps `:memory:` databases alive and serializes writers.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        tracing::debug!(database_url = %database_url, "sqlite storage opened");
        Ok(Self { pool, database_url })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    async fn load_session(&self, session_id: SessionId) -> StorageResult<Option<SessionRecord>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE id = ?"
        ))
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "session-get-query",
        })?;

        row.map(session_row_to_record).transpose()
    }
}

impl SessionStore for SqliteStorage {
    fn create_session<'a>(
        &'a self,
        input: NewSession,
    ) -> BoxFuture<'a, StorageResult<SessionRecord>> {
        Box::pin(async move {
            let session_id = SessionId::new_v7();
            let now = unix_timestamp_millis();

            sqlx::query(
                "INSERT INTO chat_sessions (id, agent_id, user_id, title, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(session_id.to_string())
            .bind(input.agent_id.to_string())
            .bind(input.owner_id.to_string())
            .bind(input.title.clone())
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "session-create-insert",
            })?;

            tracing::debug!(
                session_id = %session_id,
                agent_id = %input.agent_id,
                "created chat session"
            );

            Ok(SessionRecord {
                id: session_id,
                agent_id: input.agent_id,
                owner_id: input.owner_id,
                title: input.title,
                created_at_unix_millis: i64_to_u64(now, "session-create-created-at")?,
                updated_at_unix_millis: i64_to_u64(now, "session-create-updated-at")?,
            })
        })
    }

    fn get_session<'a>(
        &'a self,
        session_id: SessionId,
    ) -> BoxFuture<'a, StorageResult<Option<SessionRecord>>> {
        Box::pin(self.load_session(session_id))
    }

    fn list_sessions<'a>(
        &'a self,
        owner_id: UserId,
    ) -> BoxFuture<'a, StorageResult<Vec<SessionRecord>>> {
        Box::pin(async move {
            let rows = sqlx::query_as::<_, SessionRow>(&format!(
                "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE user_id = ? ORDER BY updated_at DESC, id DESC"
            ))
            .bind(owner_id.to_string())
            .fetch_all(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "session-list-query",
            })?;

            rows.into_iter().map(session_row_to_record).collect()
        })
    }

    fn update_session<'a>(
        &'a self,
        session_id: SessionId,
        patch: SessionPatch,
    ) -> BoxFuture<'a, StorageResult<SessionRecord>> {
        Box::pin(async move {
            let now = unix_timestamp_millis();
            let update_result = sqlx::query(
                "UPDATE chat_sessions SET title = COALESCE(?, title), updated_at = ? WHERE id = ?",
            )
            .bind(patch.title)
            .bind(now)
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "session-update-apply",
            })?;

            if update_result.rows_affected() == 0 {
                return NotFoundSnafu {
                    stage: "session-update-missing",
                    entity: "session",
                    id: session_id.to_string(),
                }
                .fail();
            }

            self.load_session(session_id)
                .await?
                .context(NotFoundSnafu {
                    stage: "session-update-load-missing",
                    entity: "session",
                    id: session_id.to_string(),
                })
        })
    }

    fn touch_session<'a>(&'a self, session_id: SessionId) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            let result = sqlx::query("UPDATE chat_sessions SET updated_at = ? WHERE id = ?")
                .bind(unix_timestamp_millis())
                .bind(session_id.to_string())
                .execute(&self.pool)
                .await
                .context(SqliteQuerySnafu {
                    stage: "session-touch-apply",
                })?;

            if result.rows_affected() == 0 {
                return NotFoundSnafu {
                    stage: "session-touch-missing",
                    entity: "session",
                    id: session_id.to_string(),
                }
                .fail();
            }

            Ok(())
        })
    }
}

impl MessageStore for SqliteStorage {
    fn append_message<'a>(
        &'a self,
        session_id: SessionId,
        input: NewMessage,
    ) -> BoxFuture<'a, StorageResult<MessageRecord>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.context(SqliteQuerySnafu {
                stage: "message-append-begin",
            })?;

            let session_exists =
                sqlx::query_scalar::<_, i64>("SELECT 1 FROM chat_sessions WHERE id = ? LIMIT 1")
                    .bind(session_id.to_string())
                    .fetch_optional(&mut *tx)
                    .await
                    .context(SqliteQuerySnafu {
                        stage: "message-append-session-exists",
                    })?;
            if session_exists.is_none() {
                return NotFoundSnafu {
                    stage: "message-append-session-missing",
                    entity: "session",
                    id: session_id.to_string(),
                }
                .fail();
            }

            // Seq is allocated inside the write transaction so appends cannot interleave.
            let seq = sqlx::query_scalar::<_, i64>(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM chat_messages WHERE session_id = ?",
            )
            .bind(session_id.to_string())
            .fetch_one(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-append-next-seq",
            })?;

            let message_id = MessageId::new_v7();
            let now = unix_timestamp_millis();

            sqlx::query(
                "INSERT INTO chat_messages (id, session_id, seq, role, content, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(message_id.to_string())
            .bind(session_id.to_string())
            .bind(seq)
            .bind(input.role.as_str())
            .bind(input.content.clone())
            .bind(now)
            .execute(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-append-insert",
            })?;

            sqlx::query("UPDATE chat_sessions SET updated_at = ? WHERE id = ?")
                .bind(now)
                .bind(session_id.to_string())
                .execute(&mut *tx)
                .await
                .context(SqliteQuerySnafu {
                    stage: "message-append-touch-session",
                })?;

            tx.commit().await.context(SqliteQuerySnafu {
                stage: "message-append-commit",
            })?;

            Ok(MessageRecord {
                id: message_id,
                session_id,
                seq: i64_to_u64(seq, "message-append-seq")?,
                role: input.role,
                content: input.content,
                created_at_unix_millis: i64_to_u64(now, "message-append-created-at")?,
            })
        })
    }

    fn list_messages<'a>(
        &'a self,
        session_id: SessionId,
    ) -> BoxFuture<'a, StorageResult<Vec<MessageRecord>>> {
        Box::pin(async move {
            let rows = sqlx::query_as::<_, MessageRow>(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE session_id = ? ORDER BY seq ASC, created_at ASC"
            ))
            .bind(session_id.to_string())
            .fetch_all(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-list-query",
            })?;

            rows.into_iter().map(message_row_to_record).collect()
        })
    }
}

impl AgentStore for SqliteStorage {
    fn create_agent<'a>(&'a self, input: NewAgent) -> BoxFuture<'a, StorageResult<AgentRecord>> {
        Box::pin(async move {
            let agent_id = AgentId::new_v7();
            let now = unix_timestamp_millis();
            let max_tokens = input
                .max_tokens
                .map(|value| u64_to_i64(value, "agent-create-max-tokens"))
                .transpose()?;

            sqlx::query(
                "INSERT INTO agents (id, name, description, system_prompt, model, temperature, max_tokens, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(agent_id.to_string())
            .bind(input.name.clone())
            .bind(input.description.clone())
            .bind(input.system_prompt.clone())
            .bind(input.model.clone())
            .bind(input.temperature)
            .bind(max_tokens)
            .bind(now)
            .execute(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "agent-create-insert",
            })?;

            Ok(AgentRecord {
                id: agent_id,
                name: input.name,
                description: input.description,
                system_prompt: input.system_prompt,
                model: input.model,
                temperature: input.temperature,
                max_tokens: input.max_tokens,
                created_at_unix_millis: i64_to_u64(now, "agent-create-created-at")?,
            })
        })
    }

    fn get_agent<'a>(
        &'a self,
        agent_id: AgentId,
    ) -> BoxFuture<'a, StorageResult<Option<AgentRecord>>> {
        Box::pin(async move {
            let row = sqlx::query_as::<_, AgentRow>(&format!(
                "SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?"
            ))
            .bind(agent_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "agent-get-query",
            })?;

            row.map(agent_row_to_record).transpose()
        })
    }

    fn list_agents<'a>(&'a self) -> BoxFuture<'a, StorageResult<Vec<AgentRecord>>> {
        Box::pin(async move {
            let rows = sqlx::query_as::<_, AgentRow>(&format!(
                "SELECT {AGENT_COLUMNS} FROM agents ORDER BY created_at ASC, id ASC"
            ))
            .fetch_all(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "agent-list-query",
            })?;

            rows.into_iter().map(agent_row_to_record).collect()
        })
    }
}

#[derive(Debug, FromRow)]
struct SessionRow {
    id: String,
    agent_id: String,
    user_id: String,
    title: String,
    created_at: i64,
    updated_at: i64,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    session_id: String,
    seq: i64,
    role: String,
    content: String,
    created_at: i64,
}

#[derive(Debug, FromRow)]
struct AgentRow {
    id: String,
    name: String,
    description: String,
    system_prompt: Option<String>,
    model: Option<String>,
    temperature: Option<f64>,
    max_tokens: Option<i64>,
    created_at: i64,
}

fn session_row_to_record(row: SessionRow) -> StorageResult<SessionRecord> {
    Ok(SessionRecord {
        id: SessionId::parse(&row.id)?,
        agent_id: AgentId::parse(&row.agent_id)?,
        owner_id: UserId::parse(&row.user_id)?,
        title: row.title,
        created_at_unix_millis: i64_to_u64(row.created_at, "session-row-created-at")?,
        updated_at_unix_millis: i64_to_u64(row.updated_at, "session-row-updated-at")?,
    })
}

fn message_row_to_record(row: MessageRow) -> StorageResult<MessageRecord> {
    Ok(MessageRecord {
        id: MessageId::parse(&row.id)?,
        session_id: SessionId::parse(&row.session_id)?,
        seq: i64_to_u64(row.seq, "message-row-seq")?,
        role: role_from_sql(&row.role)?,
        content: row.content,
        created_at_unix_millis: i64_to_u64(row.created_at, "message-row-created-at")?,
    })
}

fn agent_row_to_record(row: AgentRow) -> StorageResult<AgentRecord> {
    Ok(AgentRecord {
        id: AgentId::parse(&row.id)?,
        name: row.name,
        description: row.description,
        system_prompt: row.system_prompt,
        model: row.model,
        temperature: row.temperature,
        max_tokens: row
            .max_tokens
            .map(|value| i64_to_u64(value, "agent-row-max-tokens"))
            .transpose()?,
        created_at_unix_millis: i64_to_u64(row.created_at, "agent-row-created-at")?,
    })
}

fn role_from_sql(raw: &str) -> StorageResult<MessageRole> {
    match raw {
        "user" => Ok(MessageRole::User),
        "assistant" => Ok(MessageRole::Assistant),
        _ => InvariantViolationSnafu {
            stage: "message-role-from-sql",
            details: format!("unknown message role '{raw}'"),
        }
        .fail(),
    }
}

fn unix_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0_i64, |duration| duration.as_millis() as i64)
}

fn i64_to_u64(value: i64, stage: &'static str) -> StorageResult<u64> {
    value
        .try_into()
        .map_err(|_| StorageError::InvariantViolation {
            stage,
            details: format!("negative sqlite integer '{value}' cannot map to u64"),
        })
}

fn u64_to_i64(value: u64, stage: &'static str) -> StorageResult<i64> {
    value
        .try_into()
        .map_err(|_| StorageError::InvariantViolation {
            stage,
            details: format!("u64 '{value}' cannot map to sqlite i64"),
        })
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}
