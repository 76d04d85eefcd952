//! Local Store: durable task and user rows in SQLite.
//!
//! This is the only component that touches persisted rows. Every task row
//! carries its [`SyncState`] so a reconciliation pass can be resumed from
//! disk after a restart.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use chrono::{DateTime, Utc};
use familyflow_core::{RoomType, Task, TaskId, User, UserId, decode_days, encode_days};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::types::{SyncState, TrackedTask};

const TASK_COLUMNS: &str = r#"
    id, name, days, assigned_to, is_done, room_type,
    sync_state, pending_since, attempts, last_error
"#;

/// SQLite-backed Local Store.
///
/// Cheap to clone; all clones share one pool.
#[derive(Debug, Clone)]
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    /// Open (creating if missing) the database file at `path`.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create store directory at {:?}", parent))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open SQLite store at {:?}", path))?;

        Self::with_pool(pool).await
    }

    /// A private in-memory database (tests, ephemeral sessions).
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("invalid in-memory SQLite URL")?;
        // One long-lived connection: each new connection would be a new database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("failed to open in-memory SQLite store")?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                seq           INTEGER PRIMARY KEY AUTOINCREMENT,
                id            INTEGER NOT NULL UNIQUE,
                remapped_from INTEGER NULL,
                name          TEXT NOT NULL,
                days          TEXT NOT NULL,
                assigned_to   TEXT NULL,
                is_done       INTEGER NOT NULL,
                room_type     TEXT NOT NULL,
                sync_state    TEXT NOT NULL,
                pending_since TEXT NULL,
                attempts      INTEGER NOT NULL DEFAULT 0,
                last_error    TEXT NULL,
                written_mark  INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create tasks table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS tasks_room_type ON tasks (room_type, seq)")
            .execute(&self.pool)
            .await
            .context("failed to create tasks room index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id            INTEGER PRIMARY KEY,
                username      TEXT NOT NULL UNIQUE,
                email         TEXT NOT NULL UNIQUE COLLATE NOCASE,
                password_hash TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create users table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS placeholder_ids (
                entity TEXT PRIMARY KEY,
                last   INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create placeholder_ids table")?;

        sqlx::query("INSERT OR IGNORE INTO placeholder_ids (entity, last) VALUES ('task', 0), ('user', 0)")
            .execute(&self.pool)
            .await
            .context("failed to seed placeholder_ids")?;

        // Monotonic counter stamped on every local task write, so a room
        // merge can tell which rows changed after its listing was requested.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS write_marks (
                id   INTEGER PRIMARY KEY CHECK (id = 1),
                last INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create write_marks table")?;

        sqlx::query("INSERT OR IGNORE INTO write_marks (id, last) VALUES (1, 0)")
            .execute(&self.pool)
            .await
            .context("failed to seed write_marks")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS deleted_tasks (
                id           INTEGER PRIMARY KEY,
                written_mark INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create deleted_tasks table")?;

        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tasks
    // ─────────────────────────────────────────────────────────────────────

    /// Insert a task, or replace the row with the same id.
    ///
    /// An unassigned id (`0`) gets a fresh negative placeholder that is never
    /// handed out again. Returns the id the row is stored under.
    pub async fn insert_or_replace_task(&self, task: &Task, state: SyncState) -> anyhow::Result<TaskId> {
        let mut tx = self.pool.begin().await.context("failed to begin task insert")?;

        let id = if task.id == TaskId::UNASSIGNED {
            TaskId::new(next_placeholder(&mut tx, "task").await?)
        } else {
            task.id
        };
        let now = Utc::now().to_rfc3339();
        let mark = next_write_mark(&mut tx).await?;

        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, name, days, assigned_to, is_done, room_type,
                sync_state, pending_since, attempts, last_error, written_mark
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, CASE WHEN ?7 = 'clean' THEN NULL ELSE ?8 END, 0, NULL, ?9)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                days = excluded.days,
                assigned_to = excluded.assigned_to,
                is_done = excluded.is_done,
                room_type = excluded.room_type,
                sync_state = excluded.sync_state,
                pending_since = CASE
                    WHEN excluded.sync_state = 'clean' THEN NULL
                    ELSE COALESCE(tasks.pending_since, ?8)
                END,
                attempts = CASE WHEN excluded.sync_state = 'clean' THEN 0 ELSE tasks.attempts END,
                last_error = CASE WHEN excluded.sync_state = 'clean' THEN NULL ELSE tasks.last_error END,
                written_mark = excluded.written_mark
            "#,
        )
        .bind(id.get())
        .bind(&task.name)
        .bind(encode_days(&task.days))
        .bind(task.assigned_to.as_deref())
        .bind(task.is_done)
        .bind(task.room_type.as_str())
        .bind(state.as_str())
        .bind(&now)
        .bind(mark)
        .execute(&mut *tx)
        .await
        .context("failed to upsert task")?;

        tx.commit().await.context("failed to commit task insert")?;
        Ok(id)
    }

    /// Overwrite the fields of an existing row. Returns `false` when no row
    /// has that id.
    pub async fn update_task(&self, task: &Task, state: SyncState) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await.context("failed to begin task update")?;
        let now = Utc::now().to_rfc3339();
        let mark = next_write_mark(&mut tx).await?;
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET name = ?2,
                days = ?3,
                assigned_to = ?4,
                is_done = ?5,
                room_type = ?6,
                sync_state = ?7,
                pending_since = CASE WHEN ?7 = 'clean' THEN NULL ELSE COALESCE(pending_since, ?8) END,
                attempts = CASE WHEN ?7 = 'clean' THEN 0 ELSE attempts END,
                last_error = CASE WHEN ?7 = 'clean' THEN NULL ELSE last_error END,
                written_mark = ?9
            WHERE id = ?1
            "#,
        )
        .bind(task.id.get())
        .bind(&task.name)
        .bind(encode_days(&task.days))
        .bind(task.assigned_to.as_deref())
        .bind(task.is_done)
        .bind(task.room_type.as_str())
        .bind(state.as_str())
        .bind(&now)
        .bind(mark)
        .execute(&mut *tx)
        .await
        .context("failed to update task")?;

        tx.commit().await.context("failed to commit task update")?;
        Ok(result.rows_affected() > 0)
    }

    /// Physically remove a row. Deleting a missing id is a no-op.
    pub async fn delete_task(&self, id: TaskId) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await.context("failed to begin task delete")?;
        let mark = next_write_mark(&mut tx).await?;

        let removed = sqlx::query("DELETE FROM tasks WHERE id = ?1 RETURNING id")
            .bind(id.get())
            .fetch_all(&mut *tx)
            .await
            .context("failed to delete task")?;
        remember_deleted(&mut tx, &removed, mark).await?;

        tx.commit().await.context("failed to commit task delete")?;
        Ok(())
    }

    /// Physically remove every row of a room, whatever its sync state.
    pub async fn delete_all_by_room(&self, room: &RoomType) -> anyhow::Result<u64> {
        let mut tx = self.pool.begin().await.context("failed to begin room delete")?;
        let mark = next_write_mark(&mut tx).await?;

        let removed = sqlx::query("DELETE FROM tasks WHERE room_type = ?1 RETURNING id")
            .bind(room.as_str())
            .fetch_all(&mut *tx)
            .await
            .context("failed to delete tasks by room")?;
        remember_deleted(&mut tx, &removed, mark).await?;

        tx.commit().await.context("failed to commit room delete")?;
        Ok(removed.len() as u64)
    }

    /// Offline bulk delete: drop rows the remote never saw, tombstone the rest.
    pub async fn tombstone_room(&self, room: &RoomType) -> anyhow::Result<Vec<TaskId>> {
        let mut tx = self.pool.begin().await.context("failed to begin room tombstone")?;

        sqlx::query("DELETE FROM tasks WHERE room_type = ?1 AND id <= 0")
            .bind(room.as_str())
            .execute(&mut *tx)
            .await
            .context("failed to drop placeholder rows")?;

        let now = Utc::now().to_rfc3339();
        let rows = sqlx::query(
            r#"
            UPDATE tasks
            SET sync_state = 'tombstoned',
                pending_since = COALESCE(pending_since, ?2)
            WHERE room_type = ?1
            RETURNING id
            "#,
        )
        .bind(room.as_str())
        .bind(&now)
        .fetch_all(&mut *tx)
        .await
        .context("failed to tombstone room")?;

        tx.commit().await.context("failed to commit room tombstone")?;

        rows.into_iter()
            .map(|row| -> anyhow::Result<TaskId> { Ok(TaskId::new(row.try_get("id")?)) })
            .collect()
    }

    /// Visible tasks of a room in insertion order (tombstones hidden).
    pub async fn get_tasks_by_room(&self, room: &RoomType) -> anyhow::Result<Vec<Task>> {
        Ok(self
            .get_tracked_tasks_by_room(room)
            .await?
            .into_iter()
            .map(|t| t.task)
            .collect())
    }

    /// Like [`get_tasks_by_room`](Self::get_tasks_by_room) but with sync
    /// bookkeeping, so callers can flag unsynced rows.
    pub async fn get_tracked_tasks_by_room(&self, room: &RoomType) -> anyhow::Result<Vec<TrackedTask>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE room_type = ?1 AND sync_state != 'tombstoned' ORDER BY seq ASC"
        ))
        .bind(room.as_str())
        .fetch_all(&self.pool)
        .await
        .context("failed to list tasks by room")?;

        rows.into_iter().map(row_to_tracked_task).collect()
    }

    /// Fetch a row by its current id, tombstones included.
    pub async fn get_task(&self, id: TaskId) -> anyhow::Result<Option<TrackedTask>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .context("failed to fetch task")?;

        row.map(row_to_tracked_task).transpose()
    }

    /// Map an id a caller may still hold (possibly a placeholder that has
    /// since been replaced by a server id) to the row's current id.
    pub async fn resolve_task_id(&self, id: TaskId) -> anyhow::Result<Option<TaskId>> {
        let row = sqlx::query(
            r#"
            SELECT id
            FROM tasks
            WHERE id = ?1 OR remapped_from = ?1
            ORDER BY (id = ?1) DESC, seq DESC
            LIMIT 1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .context("failed to resolve task id")?;

        row.map(|row| -> anyhow::Result<TaskId> { Ok(TaskId::new(row.try_get("id")?)) })
            .transpose()
    }

    /// Every unsynced row, grouped by room (known rooms first), oldest first
    /// within a room.
    pub async fn pending_tasks(&self) -> anyhow::Result<Vec<TrackedTask>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE sync_state != 'clean' ORDER BY seq ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .context("failed to list pending tasks")?;

        let mut pending = rows
            .into_iter()
            .map(row_to_tracked_task)
            .collect::<anyhow::Result<Vec<_>>>()?;
        // Stable: keeps insertion order inside each room.
        pending.sort_by(|a, b| a.room_type().cmp(b.room_type()));
        Ok(pending)
    }

    pub async fn mark_task_state(&self, id: TaskId, state: SyncState) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await.context("failed to begin state change")?;
        let now = Utc::now().to_rfc3339();
        let mark = next_write_mark(&mut tx).await?;
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET sync_state = ?2,
                pending_since = CASE WHEN ?2 = 'clean' THEN NULL ELSE COALESCE(pending_since, ?3) END,
                attempts = CASE WHEN ?2 = 'clean' THEN 0 ELSE attempts END,
                last_error = CASE WHEN ?2 = 'clean' THEN NULL ELSE last_error END,
                written_mark = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id.get())
        .bind(state.as_str())
        .bind(&now)
        .bind(mark)
        .execute(&mut *tx)
        .await
        .context("failed to mark task state")?;

        tx.commit().await.context("failed to commit state change")?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a failed push; the row keeps its pending state.
    pub async fn record_sync_failure(&self, id: TaskId, error: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET attempts = attempts + 1,
                last_error = ?2
            WHERE id = ?1
            "#,
        )
        .bind(id.get())
        .bind(error)
        .execute(&self.pool)
        .await
        .context("failed to record sync failure")?;
        Ok(())
    }

    /// Swap a placeholder id for the server id and store the confirmed
    /// fields, keeping the row's position. Any other row already holding the
    /// server id is dropped so exactly one row remains.
    pub async fn replace_placeholder_id(&self, placeholder: TaskId, confirmed: &Task) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await.context("failed to begin id rewrite")?;
        let mark = next_write_mark(&mut tx).await?;

        sqlx::query("DELETE FROM tasks WHERE id = ?1 AND id != ?2")
            .bind(confirmed.id.get())
            .bind(placeholder.get())
            .execute(&mut *tx)
            .await
            .context("failed to clear duplicate server row")?;

        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET id = ?2,
                remapped_from = ?1,
                name = ?3,
                days = ?4,
                assigned_to = ?5,
                is_done = ?6,
                room_type = ?7,
                sync_state = 'clean',
                pending_since = NULL,
                attempts = 0,
                last_error = NULL,
                written_mark = ?8
            WHERE id = ?1
            "#,
        )
        .bind(placeholder.get())
        .bind(confirmed.id.get())
        .bind(&confirmed.name)
        .bind(encode_days(&confirmed.days))
        .bind(confirmed.assigned_to.as_deref())
        .bind(confirmed.is_done)
        .bind(confirmed.room_type.as_str())
        .bind(mark)
        .execute(&mut *tx)
        .await
        .context("failed to rewrite placeholder id")?;

        tx.commit().await.context("failed to commit id rewrite")?;
        Ok(result.rows_affected() > 0)
    }

    /// Current write mark. Capture it before requesting a room listing and
    /// hand it to [`merge_remote_room`](Self::merge_remote_room).
    pub async fn write_mark(&self) -> anyhow::Result<i64> {
        let row = sqlx::query("SELECT last FROM write_marks WHERE id = 1")
            .fetch_one(&self.pool)
            .await
            .context("failed to read write mark")?;
        Ok(row.try_get("last")?)
    }

    /// Fold a server listing of `room`, requested at write mark `listed_at`,
    /// into the store.
    ///
    /// Clean rows take the server version and clean rows the server no longer
    /// lists are dropped. Unsynced rows keep their local version, and so does
    /// any row written or deleted locally after `listed_at`: the listing
    /// predates that write.
    pub async fn merge_remote_room(&self, room: &RoomType, remote: &[Task], listed_at: i64) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await.context("failed to begin room merge")?;
        let remote_ids = serde_json::to_string(&remote.iter().map(|t| t.id.get()).collect::<Vec<_>>())?;

        let local_rows: HashMap<i64, (SyncState, i64)> = sqlx::query(
            r#"
            SELECT id, sync_state, written_mark
            FROM tasks
            WHERE room_type = ?1 OR id IN (SELECT value FROM json_each(?2))
            "#,
        )
        .bind(room.as_str())
        .bind(&remote_ids)
        .fetch_all(&mut *tx)
        .await
        .context("failed to read local states for merge")?
        .into_iter()
        .map(|row| -> anyhow::Result<(i64, (SyncState, i64))> {
            let id: i64 = row.try_get("id")?;
            let raw: String = row.try_get("sync_state")?;
            Ok((id, (parse_state(&raw)?, row.try_get("written_mark")?)))
        })
        .collect::<anyhow::Result<_>>()?;

        let deleted_since: HashSet<i64> = sqlx::query(
            r#"
            SELECT id
            FROM deleted_tasks
            WHERE written_mark > ?1
              AND id IN (SELECT value FROM json_each(?2))
            "#,
        )
        .bind(listed_at)
        .bind(&remote_ids)
        .fetch_all(&mut *tx)
        .await
        .context("failed to read deleted tasks for merge")?
        .into_iter()
        .map(|row| row.try_get::<i64, _>("id"))
        .collect::<Result<HashSet<i64>, _>>()?;

        for task in remote {
            let id = task.id.get();
            if deleted_since.contains(&id) {
                continue;
            }
            if let Some((state, mark)) = local_rows.get(&id) {
                if state.is_unsynced() || *mark > listed_at {
                    continue;
                }
            }
            sqlx::query(
                r#"
                INSERT INTO tasks (id, name, days, assigned_to, is_done, room_type, sync_state, attempts)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'clean', 0)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    days = excluded.days,
                    assigned_to = excluded.assigned_to,
                    is_done = excluded.is_done,
                    room_type = excluded.room_type
                "#,
            )
            .bind(id)
            .bind(&task.name)
            .bind(encode_days(&task.days))
            .bind(task.assigned_to.as_deref())
            .bind(task.is_done)
            .bind(task.room_type.as_str())
            .execute(&mut *tx)
            .await
            .context("failed to merge remote task")?;
        }

        sqlx::query(
            r#"
            DELETE FROM tasks
            WHERE room_type = ?1
              AND sync_state = 'clean'
              AND id > 0
              AND written_mark <= ?3
              AND id NOT IN (SELECT value FROM json_each(?2))
            "#,
        )
        .bind(room.as_str())
        .bind(&remote_ids)
        .bind(listed_at)
        .execute(&mut *tx)
        .await
        .context("failed to prune tasks missing remotely")?;

        // A listing requested after a delete already reflects it.
        sqlx::query("DELETE FROM deleted_tasks WHERE written_mark <= ?1")
            .bind(listed_at)
            .execute(&mut *tx)
            .await
            .context("failed to forget settled deletes")?;

        tx.commit().await.context("failed to commit room merge")?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Users
    // ─────────────────────────────────────────────────────────────────────

    /// Insert a new local account. An existing row is never replaced: a
    /// taken username or email comes back as a [`UserConflict`]. An
    /// unassigned id gets a placeholder.
    pub async fn insert_user(&self, user: &User) -> anyhow::Result<Result<UserId, UserConflict>> {
        let mut tx = self.pool.begin().await.context("failed to begin user insert")?;

        let id = if user.id == UserId::UNASSIGNED {
            UserId::new(next_placeholder(&mut tx, "user").await?)
        } else {
            user.id
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(id.get())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                let conflict = if db.message().contains("users.email") {
                    UserConflict::Email
                } else {
                    UserConflict::Username
                };
                tx.rollback().await.context("failed to roll back user insert")?;
                return Ok(Err(conflict));
            }
            Err(e) => return Err(e).context("failed to insert user"),
        }

        tx.commit().await.context("failed to commit user insert")?;
        Ok(Ok(id))
    }

    /// Cache a server-confirmed user, replacing any row that holds the same
    /// id, username or email. An empty `password_hash` keeps the credential
    /// already stored for that account so offline login still works.
    /// Returns the row as stored.
    pub async fn cache_user(&self, user: &User) -> anyhow::Result<User> {
        let mut tx = self.pool.begin().await.context("failed to begin user cache")?;
        let mut cached = user.clone();

        if cached.password_hash.is_empty() {
            let existing = sqlx::query(
                r#"
                SELECT password_hash
                FROM users
                WHERE (id = ?1 OR username = ?2 OR email = ?3)
                  AND password_hash != ''
                ORDER BY (id = ?1) DESC
                LIMIT 1
                "#,
            )
            .bind(user.id.get())
            .bind(&user.username)
            .bind(&user.email)
            .fetch_optional(&mut *tx)
            .await
            .context("failed to look up cached credential")?;

            if let Some(row) = existing {
                cached.password_hash = row.try_get("password_hash")?;
            }
        }

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO users (id, username, email, password_hash)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(cached.id.get())
        .bind(&cached.username)
        .bind(&cached.email)
        .bind(&cached.password_hash)
        .execute(&mut *tx)
        .await
        .context("failed to cache user")?;

        tx.commit().await.context("failed to commit user cache")?;
        Ok(cached)
    }

    pub async fn get_user(&self, id: UserId) -> anyhow::Result<Option<User>> {
        self.user_where("id = ?1", UserKey::Id(id.get())).await
    }

    pub async fn get_user_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        self.user_where("username = ?1", UserKey::Text(username)).await
    }

    /// Case-insensitive, like the column's uniqueness.
    pub async fn get_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        self.user_where("email = ?1", UserKey::Text(email)).await
    }

    pub async fn username_exists(&self, username: &str) -> anyhow::Result<bool> {
        Ok(self.get_user_by_username(username).await?.is_some())
    }

    pub async fn email_exists(&self, email: &str) -> anyhow::Result<bool> {
        Ok(self.get_user_by_email(email).await?.is_some())
    }

    /// Find the user whose username or email is `login` and whose stored hash
    /// matches `password`.
    pub async fn authenticate(&self, login: &str, password: &str) -> anyhow::Result<Option<User>> {
        let user = match self.get_user_by_username(login).await? {
            Some(user) => Some(user),
            None => self.get_user_by_email(login).await?,
        };
        // Rows cached from a profile fetch carry no hash and cannot log in.
        let Some(user) = user.filter(|u| !u.password_hash.is_empty()) else {
            return Ok(None);
        };

        let matches = familyflow_auth::verify_password(password, &user.password_hash)
            .context("failed to verify stored password hash")?;
        Ok(matches.then_some(user))
    }

    async fn user_where(&self, predicate: &str, key: UserKey<'_>) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT id, username, email, password_hash FROM users WHERE {predicate} LIMIT 1");
        let query = sqlx::query(&sql);
        let query = match key {
            UserKey::Id(id) => query.bind(id),
            UserKey::Text(text) => query.bind(text),
        };
        let row = query
            .fetch_optional(&self.pool)
            .await
            .context("failed to fetch user")?;

        row.map(row_to_user).transpose()
    }
}

/// The unique user column a new account collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserConflict {
    Username,
    Email,
}

enum UserKey<'k> {
    Id(i64),
    Text(&'k str),
}

async fn next_write_mark(tx: &mut Transaction<'_, Sqlite>) -> anyhow::Result<i64> {
    let row = sqlx::query("UPDATE write_marks SET last = last + 1 WHERE id = 1 RETURNING last")
        .fetch_one(&mut **tx)
        .await
        .context("failed to advance write mark")?;
    Ok(row.try_get("last")?)
}

async fn remember_deleted(tx: &mut Transaction<'_, Sqlite>, removed: &[SqliteRow], mark: i64) -> anyhow::Result<()> {
    for row in removed {
        let id: i64 = row.try_get("id")?;
        if id <= 0 {
            continue;
        }
        sqlx::query("INSERT OR REPLACE INTO deleted_tasks (id, written_mark) VALUES (?1, ?2)")
            .bind(id)
            .bind(mark)
            .execute(&mut **tx)
            .await
            .context("failed to remember deleted task")?;
    }
    Ok(())
}

async fn next_placeholder(tx: &mut Transaction<'_, Sqlite>, entity: &str) -> anyhow::Result<i64> {
    let row = sqlx::query("UPDATE placeholder_ids SET last = last - 1 WHERE entity = ?1 RETURNING last")
        .bind(entity)
        .fetch_one(&mut **tx)
        .await
        .with_context(|| format!("failed to allocate placeholder id for {entity}"))?;
    Ok(row.try_get("last")?)
}

fn parse_state(raw: &str) -> anyhow::Result<SyncState> {
    SyncState::parse(raw).with_context(|| format!("unknown sync_state '{raw}' in tasks"))
}

/// Map a database row into a `TrackedTask`.
fn row_to_tracked_task(row: SqliteRow) -> anyhow::Result<TrackedTask> {
    let id: i64 = row.try_get("id")?;

    let days_str: String = row.try_get("days")?;
    let days = decode_days(&days_str).context("invalid days in tasks")?;

    let room_str: String = row.try_get("room_type")?;
    let room_type = RoomType::new(&room_str).context("invalid room_type in tasks")?;

    let state_str: String = row.try_get("sync_state")?;
    let state = parse_state(&state_str)?;

    let pending_since_str: Option<String> = row.try_get("pending_since")?;
    let pending_since = pending_since_str
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .context("invalid pending_since in tasks")
        })
        .transpose()?;

    let attempts: i64 = row.try_get("attempts")?;

    Ok(TrackedTask {
        task: Task {
            id: TaskId::new(id),
            name: row.try_get("name")?,
            days,
            assigned_to: row.try_get("assigned_to")?,
            is_done: row.try_get("is_done")?,
            room_type,
        },
        state,
        pending_since,
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        last_error: row.try_get("last_error")?,
    })
}

fn row_to_user(row: SqliteRow) -> anyhow::Result<User> {
    let id: i64 = row.try_get("id")?;
    Ok(User {
        id: UserId::new(id),
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
    })
}
