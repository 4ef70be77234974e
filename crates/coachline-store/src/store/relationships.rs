//! Trainer/client relationship edges.
//!
//! One row per pair and lifecycle; both sides read the same row. Every
//! transition is a single conditional UPDATE whose rows-affected count tells
//! whether it won, so a racing accept and remove cannot both succeed.

use super::{is_unique_violation, Store};
use coachline_core::{
    error::CoachlineError,
    model::{EdgeStatus, Entity, EntityStatus, RelationshipEdge, Role},
};
use serde_json::{Map, Value};
use sqlx::{Sqlite, Transaction};
use tracing::info;
use uuid::Uuid;

type EdgeRow = (String, String, String, String, String, String, Option<String>);

const EDGE_COLUMNS: &str =
    "id, trainer_id, client_id, status, invited_by, created_at, responded_at";

fn edge_from_row(row: EdgeRow) -> Result<RelationshipEdge, CoachlineError> {
    let (id, trainer_id, client_id, status, invited_by, created_at, responded_at) = row;
    Ok(RelationshipEdge {
        id,
        trainer_id,
        client_id,
        status: EdgeStatus::parse(&status)
            .ok_or_else(|| CoachlineError::Store(format!("unknown edge status '{status}'")))?,
        invited_by: Role::parse(&invited_by)
            .ok_or_else(|| CoachlineError::Store(format!("unknown role '{invited_by}'")))?,
        created_at,
        responded_at,
    })
}

/// Insert a pending edge inside an open transaction.
pub(super) async fn insert_edge(
    tx: &mut Transaction<'_, Sqlite>,
    trainer_id: &str,
    client_id: &str,
    invited_by: Role,
) -> Result<String, CoachlineError> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO relationships (id, trainer_id, client_id, status, invited_by) \
         VALUES (?, ?, ?, 'pending', ?)",
    )
    .bind(&id)
    .bind(trainer_id)
    .bind(client_id)
    .bind(invited_by.as_str())
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            CoachlineError::Conflict(format!(
                "{trainer_id} and {client_id} already have a pending or active relationship"
            ))
        } else {
            CoachlineError::Store(format!("insert edge failed: {e}"))
        }
    })?;
    Ok(id)
}

impl Store {
    /// Open a pending invitation between an existing trainer and client.
    pub async fn create_edge(
        &self,
        trainer_id: &str,
        client_id: &str,
        invited_by: Role,
    ) -> Result<RelationshipEdge, CoachlineError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoachlineError::Store(format!("begin failed: {e}")))?;
        let id = insert_edge(&mut tx, trainer_id, client_id, invited_by).await?;
        tx.commit()
            .await
            .map_err(|e| CoachlineError::Store(format!("commit failed: {e}")))?;

        info!("{invited_by} opened invitation {id} ({trainer_id} <-> {client_id})");
        self.get_edge(&id)
            .await?
            .ok_or_else(|| CoachlineError::Store(format!("edge {id} vanished after insert")))
    }

    /// Fetch an edge by id.
    pub async fn get_edge(&self, id: &str) -> Result<Option<RelationshipEdge>, CoachlineError> {
        let row: Option<EdgeRow> = sqlx::query_as(&format!(
            "SELECT {EDGE_COLUMNS} FROM relationships WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoachlineError::Store(format!("get edge failed: {e}")))?;

        row.map(edge_from_row).transpose()
    }

    /// The pending or active edge of a pair, if any.
    pub async fn open_edge_between(
        &self,
        trainer_id: &str,
        client_id: &str,
    ) -> Result<Option<RelationshipEdge>, CoachlineError> {
        let row: Option<EdgeRow> = sqlx::query_as(&format!(
            "SELECT {EDGE_COLUMNS} FROM relationships \
             WHERE trainer_id = ? AND client_id = ? AND status IN ('pending', 'active')"
        ))
        .bind(trainer_id)
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoachlineError::Store(format!("open edge lookup failed: {e}")))?;

        row.map(edge_from_row).transpose()
    }

    /// Pending and active edges touching an entity, newest first.
    pub async fn open_edges_for(
        &self,
        role: Role,
        id: &str,
    ) -> Result<Vec<RelationshipEdge>, CoachlineError> {
        let side = match role {
            Role::Trainer => "trainer_id",
            Role::Client => "client_id",
        };
        let rows: Vec<EdgeRow> = sqlx::query_as(&format!(
            "SELECT {EDGE_COLUMNS} FROM relationships \
             WHERE {side} = ? AND status IN ('pending', 'active') \
             ORDER BY created_at DESC, rowid DESC"
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoachlineError::Store(format!("list edges failed: {e}")))?;

        rows.into_iter().map(edge_from_row).collect()
    }

    /// Pending → active. Also activates a client that was created on the
    /// trainer's behalf. Rejected without mutation unless still pending.
    pub async fn accept_edge(&self, id: &str) -> Result<RelationshipEdge, CoachlineError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoachlineError::Store(format!("begin failed: {e}")))?;

        let won = sqlx::query(
            "UPDATE relationships SET status = 'active', responded_at = datetime('now'), \
             updated_at = datetime('now') WHERE id = ? AND status = 'pending'",
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoachlineError::Store(format!("accept edge failed: {e}")))?
        .rows_affected();

        if won == 0 {
            return Err(CoachlineError::Conflict(
                "this invitation is no longer pending".into(),
            ));
        }

        sqlx::query(
            "UPDATE entities SET status = ?, updated_at = datetime('now') \
             WHERE role = 'client' AND status = ? \
             AND id = (SELECT client_id FROM relationships WHERE id = ?)",
        )
        .bind(EntityStatus::Active.as_str())
        .bind(EntityStatus::Invited.as_str())
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoachlineError::Store(format!("activate client failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| CoachlineError::Store(format!("commit failed: {e}")))?;

        self.get_edge(id)
            .await?
            .ok_or_else(|| CoachlineError::Store(format!("edge {id} vanished after accept")))
    }

    /// Pending → declined. No list changes.
    pub async fn decline_edge(&self, id: &str) -> Result<RelationshipEdge, CoachlineError> {
        let won = sqlx::query(
            "UPDATE relationships SET status = 'declined', responded_at = datetime('now'), \
             updated_at = datetime('now') WHERE id = ? AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| CoachlineError::Store(format!("decline edge failed: {e}")))?
        .rows_affected();

        if won == 0 {
            return Err(CoachlineError::Conflict(
                "this invitation is no longer pending".into(),
            ));
        }

        self.get_edge(id)
            .await?
            .ok_or_else(|| CoachlineError::Store(format!("edge {id} vanished after decline")))
    }

    /// Pending/active → removed, together with every assignment of the pair.
    /// Returns the removed edge and the number of assignments dropped.
    pub async fn remove_edge(
        &self,
        trainer_id: &str,
        client_id: &str,
    ) -> Result<(RelationshipEdge, u64), CoachlineError> {
        let edge = self
            .open_edge_between(trainer_id, client_id)
            .await?
            .ok_or_else(|| {
                CoachlineError::NotFound(format!(
                    "{trainer_id} and {client_id} are not connected"
                ))
            })?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoachlineError::Store(format!("begin failed: {e}")))?;

        let won = sqlx::query(
            "UPDATE relationships SET status = 'removed', updated_at = datetime('now') \
             WHERE id = ? AND status IN ('pending', 'active')",
        )
        .bind(&edge.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoachlineError::Store(format!("remove edge failed: {e}")))?
        .rows_affected();

        if won == 0 {
            return Err(CoachlineError::Conflict(
                "this relationship changed in the meantime".into(),
            ));
        }

        let dropped = sqlx::query(
            "DELETE FROM habit_assignments WHERE trainer_id = ? AND client_id = ?",
        )
        .bind(trainer_id)
        .bind(client_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoachlineError::Store(format!("remove assignments failed: {e}")))?
        .rows_affected();

        tx.commit()
            .await
            .map_err(|e| CoachlineError::Store(format!("commit failed: {e}")))?;

        info!("removed relationship {trainer_id} <-> {client_id} ({dropped} assignments)");
        let edge = self
            .get_edge(&edge.id)
            .await?
            .ok_or_else(|| CoachlineError::Store("edge vanished after removal".into()))?;
        Ok((edge, dropped))
    }

    /// Ids of the clients actively connected to a trainer.
    pub async fn clients_of(&self, trainer_id: &str) -> Result<Vec<String>, CoachlineError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT client_id FROM relationships \
             WHERE trainer_id = ? AND status = 'active' ORDER BY client_id",
        )
        .bind(trainer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoachlineError::Store(format!("list clients failed: {e}")))?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Ids of the trainers actively connected to a client.
    pub async fn trainers_of(&self, client_id: &str) -> Result<Vec<String>, CoachlineError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT trainer_id FROM relationships \
             WHERE client_id = ? AND status = 'active' ORDER BY trainer_id",
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoachlineError::Store(format!("list trainers failed: {e}")))?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Actively connected counterpart profiles of an entity, by name.
    pub async fn counterparts(&self, role: Role, id: &str) -> Result<Vec<Entity>, CoachlineError> {
        let (side, other) = match role {
            Role::Trainer => ("trainer_id", "client_id"),
            Role::Client => ("client_id", "trainer_id"),
        };
        let rows: Vec<(String, String, Option<String>, String, String, String)> =
            sqlx::query_as(&format!(
                "SELECT e.id, e.name, e.phone, e.profile, e.status, e.created_at \
                 FROM relationships r JOIN entities e ON e.role = ? AND e.id = r.{other} \
                 WHERE r.{side} = ? AND r.status = 'active' ORDER BY e.name, e.id"
            ))
            .bind(role.opposite().as_str())
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CoachlineError::Store(format!("list counterparts failed: {e}")))?;

        rows.into_iter()
            .map(|(eid, name, phone, profile, status, created_at)| {
                Ok(Entity {
                    role: role.opposite(),
                    id: eid,
                    name,
                    phone,
                    profile: serde_json::from_str::<Map<String, Value>>(&profile)?,
                    status: EntityStatus::parse(&status).ok_or_else(|| {
                        CoachlineError::Store(format!("unknown entity status '{status}'"))
                    })?,
                    created_at,
                })
            })
            .collect()
    }
}
