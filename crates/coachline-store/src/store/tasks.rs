//! Multi-step task records.
//!
//! The partial unique index `idx_tasks_one_running` backs the rule that a
//! (role, entity) has at most one running task; status changes are
//! conditional on the row still being `running`.

use super::{is_unique_violation, Store};
use coachline_core::{
    error::CoachlineError,
    model::{Role, TaskRecord, TaskStatus},
};
use serde_json::{Map, Value};
use uuid::Uuid;

type TaskRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
);

const TASK_COLUMNS: &str =
    "id, role, entity_id, task_type, status, payload, started_at, completed_at, stopped_at";

fn task_from_row(row: TaskRow) -> Result<TaskRecord, CoachlineError> {
    let (id, role, entity_id, task_type, status, payload, started_at, completed_at, stopped_at) =
        row;
    Ok(TaskRecord {
        id,
        role: Role::parse(&role)
            .ok_or_else(|| CoachlineError::Store(format!("unknown role '{role}'")))?,
        entity_id,
        task_type,
        status: TaskStatus::parse(&status)
            .ok_or_else(|| CoachlineError::Store(format!("unknown task status '{status}'")))?,
        payload: serde_json::from_str(&payload)?,
        started_at,
        completed_at,
        stopped_at,
    })
}

impl Store {
    /// Insert a task. A `running` insert fails with `Conflict` when the
    /// (role, entity) already has one. Terminal statuses get their timestamp
    /// in the same write.
    pub async fn insert_task(
        &self,
        role: Role,
        entity_id: &str,
        task_type: &str,
        status: TaskStatus,
        payload: &Map<String, Value>,
    ) -> Result<TaskRecord, CoachlineError> {
        let id = Uuid::new_v4().to_string();
        let completed = matches!(status, TaskStatus::Completed | TaskStatus::Failed);

        sqlx::query(
            "INSERT INTO tasks (id, role, entity_id, task_type, status, payload, completed_at) \
             VALUES (?, ?, ?, ?, ?, ?, CASE WHEN ? THEN datetime('now') END)",
        )
        .bind(&id)
        .bind(role.as_str())
        .bind(entity_id)
        .bind(task_type)
        .bind(status.as_str())
        .bind(serde_json::to_string(payload)?)
        .bind(completed)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                CoachlineError::Conflict(format!("{role} {entity_id} already has a running task"))
            } else {
                CoachlineError::Store(format!("insert task failed: {e}"))
            }
        })?;

        self.get_task(&id)
            .await?
            .ok_or_else(|| CoachlineError::Store(format!("task {id} vanished after insert")))
    }

    /// Fetch a task by id.
    pub async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>, CoachlineError> {
        let row: Option<TaskRow> =
            sqlx::query_as(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| CoachlineError::Store(format!("get task failed: {e}")))?;

        row.map(task_from_row).transpose()
    }

    /// The running task of a (role, entity), if any.
    pub async fn running_task(
        &self,
        role: Role,
        entity_id: &str,
    ) -> Result<Option<TaskRecord>, CoachlineError> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE role = ? AND entity_id = ? AND status = 'running'"
        ))
        .bind(role.as_str())
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoachlineError::Store(format!("running task lookup failed: {e}")))?;

        row.map(task_from_row).transpose()
    }

    /// The most recently started task of a (role, entity), whatever its status.
    pub async fn latest_task(
        &self,
        role: Role,
        entity_id: &str,
    ) -> Result<Option<TaskRecord>, CoachlineError> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE role = ? AND entity_id = ? \
             ORDER BY started_at DESC, rowid DESC LIMIT 1"
        ))
        .bind(role.as_str())
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoachlineError::Store(format!("latest task lookup failed: {e}")))?;

        row.map(task_from_row).transpose()
    }

    /// Completed tasks, newest first.
    pub async fn recent_completed_tasks(
        &self,
        role: Role,
        entity_id: &str,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, CoachlineError> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE role = ? AND entity_id = ? AND status = 'completed' \
             ORDER BY completed_at DESC, rowid DESC LIMIT ?"
        ))
        .bind(role.as_str())
        .bind(entity_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoachlineError::Store(format!("recent tasks lookup failed: {e}")))?;

        rows.into_iter().map(task_from_row).collect()
    }

    /// Every task of a (role, entity), oldest first.
    pub async fn list_tasks(
        &self,
        role: Role,
        entity_id: &str,
    ) -> Result<Vec<TaskRecord>, CoachlineError> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE role = ? AND entity_id = ? \
             ORDER BY started_at, rowid"
        ))
        .bind(role.as_str())
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoachlineError::Store(format!("list tasks failed: {e}")))?;

        rows.into_iter().map(task_from_row).collect()
    }

    /// Replace the payload of a running task. Returns `false` when the task is
    /// no longer running (stopped in the meantime).
    pub async fn update_task_payload(
        &self,
        id: &str,
        payload: &Map<String, Value>,
    ) -> Result<bool, CoachlineError> {
        let affected = sqlx::query(
            "UPDATE tasks SET payload = ?, updated_at = datetime('now') \
             WHERE id = ? AND status = 'running'",
        )
        .bind(serde_json::to_string(payload)?)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| CoachlineError::Store(format!("update task payload failed: {e}")))?
        .rows_affected();

        Ok(affected > 0)
    }

    /// Move a running task to a terminal status with its final payload.
    /// Returns `false` when the task was not running.
    pub async fn finish_task(
        &self,
        id: &str,
        status: TaskStatus,
        payload: &Map<String, Value>,
    ) -> Result<bool, CoachlineError> {
        if !TaskStatus::Running.can_transition_to(status) {
            return Err(CoachlineError::Store(format!(
                "cannot finish a task as {status}"
            )));
        }

        let affected = sqlx::query(
            "UPDATE tasks SET status = ?, payload = ?, updated_at = datetime('now'), \
             completed_at = CASE WHEN ? = 'stopped' THEN completed_at ELSE datetime('now') END, \
             stopped_at = CASE WHEN ? = 'stopped' THEN datetime('now') ELSE stopped_at END \
             WHERE id = ? AND status = 'running'",
        )
        .bind(status.as_str())
        .bind(serde_json::to_string(payload)?)
        .bind(status.as_str())
        .bind(status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| CoachlineError::Store(format!("finish task failed: {e}")))?
        .rows_affected();

        Ok(affected > 0)
    }

    /// Stop the running task of a (role, entity) without touching its payload.
    /// Returns the stopped task, or `None` when nothing was running.
    pub async fn stop_running_task(
        &self,
        role: Role,
        entity_id: &str,
    ) -> Result<Option<TaskRecord>, CoachlineError> {
        let Some(task) = self.running_task(role, entity_id).await? else {
            return Ok(None);
        };

        let affected = sqlx::query(
            "UPDATE tasks SET status = 'stopped', stopped_at = datetime('now'), \
             updated_at = datetime('now') WHERE id = ? AND status = 'running'",
        )
        .bind(&task.id)
        .execute(&self.pool)
        .await
        .map_err(|e| CoachlineError::Store(format!("stop task failed: {e}")))?
        .rows_affected();

        if affected == 0 {
            return Ok(None);
        }
        self.get_task(&task.id).await
    }
}
