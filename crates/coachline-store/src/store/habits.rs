//! Habits, assignments, and append-only habit logs.

use super::{is_unique_violation, Store};
use chrono::{DateTime, SecondsFormat, Utc};
use coachline_core::{
    error::CoachlineError,
    model::{Frequency, Habit, HabitAssignment, HabitLogEntry},
};
use tracing::info;
use uuid::Uuid;

type HabitRow = (String, String, String, f64, String, String, String);

const HABIT_COLUMNS: &str = "id, trainer_id, name, target, unit, frequency, created_at";

fn habit_from_row(row: HabitRow) -> Result<Habit, CoachlineError> {
    let (id, trainer_id, name, target, unit, frequency, created_at) = row;
    Ok(Habit {
        id,
        trainer_id,
        name,
        target,
        unit,
        frequency: Frequency::parse(&frequency)
            .ok_or_else(|| CoachlineError::Store(format!("unknown frequency '{frequency}'")))?,
        created_at,
    })
}

fn log_from_row(row: (i64, String, String, f64, String)) -> Result<HabitLogEntry, CoachlineError> {
    let (id, habit_id, client_id, value, logged_at) = row;
    let logged_at = DateTime::parse_from_rfc3339(&logged_at)
        .map_err(|e| CoachlineError::Store(format!("bad log timestamp '{logged_at}': {e}")))?
        .with_timezone(&Utc);
    Ok(HabitLogEntry {
        id,
        habit_id,
        client_id,
        value,
        logged_at,
    })
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl Store {
    /// Create a habit owned by a trainer.
    pub async fn create_habit(
        &self,
        trainer_id: &str,
        name: &str,
        target: f64,
        unit: &str,
        frequency: Frequency,
    ) -> Result<Habit, CoachlineError> {
        if !(target.is_finite() && target > 0.0) {
            return Err(CoachlineError::Validation(
                "the target must be a number above zero".into(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO habits (id, trainer_id, name, target, unit, frequency) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(trainer_id)
        .bind(name)
        .bind(target)
        .bind(unit)
        .bind(frequency.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| CoachlineError::Store(format!("insert habit failed: {e}")))?;

        info!("trainer {trainer_id} created habit {id} ({name})");
        self.get_habit(&id)
            .await?
            .ok_or_else(|| CoachlineError::Store(format!("habit {id} vanished after insert")))
    }

    /// Fetch a habit by id.
    pub async fn get_habit(&self, id: &str) -> Result<Option<Habit>, CoachlineError> {
        let row: Option<HabitRow> =
            sqlx::query_as(&format!("SELECT {HABIT_COLUMNS} FROM habits WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| CoachlineError::Store(format!("get habit failed: {e}")))?;

        row.map(habit_from_row).transpose()
    }

    /// Habits owned by a trainer, by name.
    pub async fn habits_of_trainer(&self, trainer_id: &str) -> Result<Vec<Habit>, CoachlineError> {
        let rows: Vec<HabitRow> = sqlx::query_as(&format!(
            "SELECT {HABIT_COLUMNS} FROM habits WHERE trainer_id = ? ORDER BY name, id"
        ))
        .bind(trainer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoachlineError::Store(format!("list habits failed: {e}")))?;

        rows.into_iter().map(habit_from_row).collect()
    }

    /// Update one editable habit field: `name`, `target`, `unit` or `frequency`.
    pub async fn update_habit_field(
        &self,
        id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), CoachlineError> {
        // Text bound into the REAL `target` column is stored as a number by
        // SQLite's type affinity.
        let (column, bound) = match key {
            "name" | "unit" => (key, value.trim().to_string()),
            "target" => {
                let target: f64 = value.trim().parse().map_err(|_| {
                    CoachlineError::Validation(format!("'{value}' is not a number"))
                })?;
                if !(target.is_finite() && target > 0.0) {
                    return Err(CoachlineError::Validation(
                        "the target must be a number above zero".into(),
                    ));
                }
                ("target", target.to_string())
            }
            "frequency" => {
                let frequency = Frequency::parse(value.trim()).ok_or_else(|| {
                    CoachlineError::Validation("frequency is daily or weekly".into())
                })?;
                ("frequency", frequency.as_str().to_string())
            }
            other => {
                return Err(CoachlineError::Validation(format!(
                    "'{other}' is not an editable habit field"
                )));
            }
        };

        let affected = sqlx::query(&format!(
            "UPDATE habits SET {column} = ?, updated_at = datetime('now') WHERE id = ?"
        ))
        .bind(bound)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| CoachlineError::Store(format!("update habit failed: {e}")))?
        .rows_affected();

        if affected == 0 {
            return Err(CoachlineError::NotFound(format!("habit {id} does not exist")));
        }
        Ok(())
    }

    /// Delete a habit with its assignments and logs. Returns whether it existed.
    pub async fn delete_habit(&self, id: &str) -> Result<bool, CoachlineError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoachlineError::Store(format!("begin failed: {e}")))?;

        sqlx::query("DELETE FROM habit_logs WHERE habit_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoachlineError::Store(format!("delete habit logs failed: {e}")))?;

        sqlx::query("DELETE FROM habit_assignments WHERE habit_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoachlineError::Store(format!("delete assignments failed: {e}")))?;

        let deleted = sqlx::query("DELETE FROM habits WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoachlineError::Store(format!("delete habit failed: {e}")))?
            .rows_affected();

        tx.commit()
            .await
            .map_err(|e| CoachlineError::Store(format!("commit failed: {e}")))?;

        Ok(deleted > 0)
    }

    /// Assign a habit to a client. Re-assigning reactivates the existing row.
    pub async fn assign_habit(
        &self,
        habit_id: &str,
        client_id: &str,
        trainer_id: &str,
    ) -> Result<HabitAssignment, CoachlineError> {
        sqlx::query(
            "INSERT INTO habit_assignments (id, habit_id, client_id, trainer_id) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(habit_id, client_id) DO UPDATE SET active = 1, trainer_id = excluded.trainer_id",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(habit_id)
        .bind(client_id)
        .bind(trainer_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                CoachlineError::Conflict("habit already assigned".into())
            } else {
                CoachlineError::Store(format!("assign habit failed: {e}"))
            }
        })?;

        let row: (String, String, String, String, bool, String) = sqlx::query_as(
            "SELECT id, habit_id, client_id, trainer_id, active, created_at \
             FROM habit_assignments WHERE habit_id = ? AND client_id = ?",
        )
        .bind(habit_id)
        .bind(client_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CoachlineError::Store(format!("read assignment failed: {e}")))?;

        let (id, habit_id, client_id, trainer_id, active, created_at) = row;
        Ok(HabitAssignment {
            id,
            habit_id,
            client_id,
            trainer_id,
            active,
            created_at,
        })
    }

    /// Remove a habit from a client. Returns whether an assignment existed.
    pub async fn unassign_habit(
        &self,
        habit_id: &str,
        client_id: &str,
    ) -> Result<bool, CoachlineError> {
        let affected =
            sqlx::query("DELETE FROM habit_assignments WHERE habit_id = ? AND client_id = ?")
                .bind(habit_id)
                .bind(client_id)
                .execute(&self.pool)
                .await
                .map_err(|e| CoachlineError::Store(format!("unassign habit failed: {e}")))?
                .rows_affected();
        Ok(affected > 0)
    }

    /// Habits actively assigned to a client, from any trainer.
    pub async fn assigned_habits(&self, client_id: &str) -> Result<Vec<Habit>, CoachlineError> {
        let rows: Vec<HabitRow> = sqlx::query_as(
            "SELECT h.id, h.trainer_id, h.name, h.target, h.unit, h.frequency, h.created_at \
             FROM habit_assignments a JOIN habits h ON h.id = a.habit_id \
             WHERE a.client_id = ? AND a.active = 1 ORDER BY h.name, h.id",
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoachlineError::Store(format!("list assigned habits failed: {e}")))?;

        rows.into_iter().map(habit_from_row).collect()
    }

    /// Habits a specific trainer has assigned to a client.
    pub async fn assigned_habits_from(
        &self,
        trainer_id: &str,
        client_id: &str,
    ) -> Result<Vec<Habit>, CoachlineError> {
        let rows: Vec<HabitRow> = sqlx::query_as(
            "SELECT h.id, h.trainer_id, h.name, h.target, h.unit, h.frequency, h.created_at \
             FROM habit_assignments a JOIN habits h ON h.id = a.habit_id \
             WHERE a.trainer_id = ? AND a.client_id = ? AND a.active = 1 \
             ORDER BY h.name, h.id",
        )
        .bind(trainer_id)
        .bind(client_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoachlineError::Store(format!("list assigned habits failed: {e}")))?;

        rows.into_iter().map(habit_from_row).collect()
    }

    /// Append a completion value. Logs are never updated; the table rejects it.
    pub async fn append_log(
        &self,
        habit_id: &str,
        client_id: &str,
        value: f64,
        at: DateTime<Utc>,
    ) -> Result<HabitLogEntry, CoachlineError> {
        if !value.is_finite() {
            return Err(CoachlineError::Validation("the value must be a number".into()));
        }

        let id = sqlx::query(
            "INSERT INTO habit_logs (habit_id, client_id, value, logged_at) VALUES (?, ?, ?, ?)",
        )
        .bind(habit_id)
        .bind(client_id)
        .bind(value)
        .bind(timestamp(at))
        .execute(&self.pool)
        .await
        .map_err(|e| CoachlineError::Store(format!("append log failed: {e}")))?
        .last_insert_rowid();

        Ok(HabitLogEntry {
            id,
            habit_id: habit_id.to_string(),
            client_id: client_id.to_string(),
            value,
            logged_at: at,
        })
    }

    /// Logs of one client/habit with `from <= logged_at < to`, oldest first.
    pub async fn logs_between(
        &self,
        client_id: &str,
        habit_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<HabitLogEntry>, CoachlineError> {
        let rows: Vec<(i64, String, String, f64, String)> = sqlx::query_as(
            "SELECT id, habit_id, client_id, value, logged_at FROM habit_logs \
             WHERE client_id = ? AND habit_id = ? AND logged_at >= ? AND logged_at < ? \
             ORDER BY logged_at, id",
        )
        .bind(client_id)
        .bind(habit_id)
        .bind(timestamp(from))
        .bind(timestamp(to))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoachlineError::Store(format!("read habit logs failed: {e}")))?;

        rows.into_iter().map(log_from_row).collect()
    }
}
