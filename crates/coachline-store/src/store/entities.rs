//! Trainer and client profiles.

use super::{is_unique_violation, relationships::insert_edge, Store};
use chrono::NaiveDate;
use coachline_core::{
    error::CoachlineError,
    ids,
    model::{Entity, EntityStatus, RelationshipEdge, Role},
};
use serde_json::{Map, Value};
use sqlx::{Sqlite, Transaction};
use tracing::{debug, info};

/// Fields for a profile that does not exist yet.
#[derive(Debug, Clone)]
pub struct NewEntity {
    pub role: Role,
    pub name: String,
    pub phone: Option<String>,
    pub profile: Map<String, Value>,
}

type EntityRow = (String, String, String, Option<String>, String, String, String);

const ENTITY_COLUMNS: &str = "role, id, name, phone, profile, status, created_at";

fn entity_from_row(row: EntityRow) -> Result<Entity, CoachlineError> {
    let (role, id, name, phone, profile, status, created_at) = row;
    let profile: Map<String, Value> = serde_json::from_str(&profile)?;
    Ok(Entity {
        role: Role::parse(&role)
            .ok_or_else(|| CoachlineError::Store(format!("unknown role '{role}'")))?,
        id,
        name,
        phone,
        profile,
        status: EntityStatus::parse(&status)
            .ok_or_else(|| CoachlineError::Store(format!("unknown entity status '{status}'")))?,
        created_at,
    })
}

fn side_column(role: Role) -> &'static str {
    match role {
        Role::Trainer => "trainer_id",
        Role::Client => "client_id",
    }
}

/// Insert a profile under the first free id candidate.
async fn insert_with_generated_id(
    tx: &mut Transaction<'_, Sqlite>,
    new: &NewEntity,
    status: EntityStatus,
    joined: NaiveDate,
) -> Result<String, CoachlineError> {
    let profile = serde_json::to_string(&new.profile)?;
    let base = ids::base_id(&new.name, joined);
    let candidates = ids::candidates(&base, &mut rand::thread_rng());

    for candidate in candidates {
        let result = sqlx::query(
            "INSERT INTO entities (role, id, name, phone, profile, status) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(new.role.as_str())
        .bind(&candidate)
        .bind(&new.name)
        .bind(&new.phone)
        .bind(&profile)
        .bind(status.as_str())
        .execute(&mut **tx)
        .await;

        match result {
            Ok(_) => return Ok(candidate),
            Err(e) if is_unique_violation(&e) => {
                debug!("entity id {candidate} taken, trying next candidate");
            }
            Err(e) => {
                return Err(CoachlineError::Store(format!("insert entity failed: {e}")));
            }
        }
    }

    Err(CoachlineError::Conflict(format!(
        "no free {} id left for base {base}",
        new.role
    )))
}

/// Create the account row if missing and claim its `role` link slot.
async fn claim_link(
    tx: &mut Transaction<'_, Sqlite>,
    address: &str,
    channel: &str,
    role: Role,
) -> Result<(), CoachlineError> {
    sqlx::query("INSERT INTO accounts (address, channel) VALUES (?, ?) ON CONFLICT(address) DO NOTHING")
        .bind(address)
        .bind(channel)
        .execute(&mut **tx)
        .await
        .map_err(|e| CoachlineError::Store(format!("create account failed: {e}")))?;

    let existing: Option<(Option<String>,)> = sqlx::query_as(&format!(
        "SELECT {} FROM accounts WHERE address = ?",
        side_column(role)
    ))
    .bind(address)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| CoachlineError::Store(format!("read account failed: {e}")))?;

    if let Some((Some(id),)) = existing {
        return Err(CoachlineError::Conflict(format!(
            "this address already has a {role} profile ({id})"
        )));
    }
    Ok(())
}

impl Store {
    /// Register a new profile for an address: create it, link it to the
    /// account (creating the account on first contact) and log in as it.
    pub async fn register_entity(
        &self,
        address: &str,
        channel: &str,
        new: &NewEntity,
        joined: NaiveDate,
    ) -> Result<Entity, CoachlineError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoachlineError::Store(format!("begin failed: {e}")))?;

        claim_link(&mut tx, address, channel, new.role).await?;
        let id = insert_with_generated_id(&mut tx, new, EntityStatus::Active, joined).await?;

        sqlx::query(&format!(
            "UPDATE accounts SET {} = ?, login_role = ?, updated_at = datetime('now') \
             WHERE address = ?",
            side_column(new.role)
        ))
        .bind(&id)
        .bind(new.role.as_str())
        .bind(address)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoachlineError::Store(format!("link entity failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| CoachlineError::Store(format!("commit failed: {e}")))?;

        info!("registered {} {id} for {address}", new.role);
        self.get_entity(new.role, &id)
            .await?
            .ok_or_else(|| CoachlineError::Store(format!("{} {id} vanished after insert", new.role)))
    }

    /// Create a client on a trainer's behalf and invite it, in one transaction.
    /// The client's phone becomes its account address on `channel`.
    pub async fn create_invited_client(
        &self,
        trainer_id: &str,
        channel: &str,
        new: &NewEntity,
        joined: NaiveDate,
    ) -> Result<(Entity, RelationshipEdge), CoachlineError> {
        let address = new
            .phone
            .clone()
            .ok_or_else(|| CoachlineError::Validation("a phone number is required".into()))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoachlineError::Store(format!("begin failed: {e}")))?;

        claim_link(&mut tx, &address, channel, Role::Client).await?;
        let id = insert_with_generated_id(&mut tx, new, EntityStatus::Invited, joined).await?;

        sqlx::query(
            "UPDATE accounts SET client_id = ?, updated_at = datetime('now') WHERE address = ?",
        )
        .bind(&id)
        .bind(&address)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoachlineError::Store(format!("link entity failed: {e}")))?;

        let edge_id = insert_edge(&mut tx, trainer_id, &id, Role::Trainer).await?;

        tx.commit()
            .await
            .map_err(|e| CoachlineError::Store(format!("commit failed: {e}")))?;

        info!("trainer {trainer_id} created and invited client {id}");
        let entity = self
            .get_entity(Role::Client, &id)
            .await?
            .ok_or_else(|| CoachlineError::Store(format!("client {id} vanished after insert")))?;
        let edge = self
            .get_edge(&edge_id)
            .await?
            .ok_or_else(|| CoachlineError::Store(format!("edge {edge_id} vanished after insert")))?;
        Ok((entity, edge))
    }

    /// Hand an invited client over to the person registering with its phone.
    ///
    /// Matches only a client still parked on its phone-keyed placeholder
    /// account. The placeholder link moves to `address`, which logs in as the
    /// client; the registration answers replace the trainer-entered name and
    /// fill the profile. Returns `None` when nothing is waiting for this phone.
    pub async fn claim_invited_client(
        &self,
        address: &str,
        channel: &str,
        new: &NewEntity,
    ) -> Result<Option<Entity>, CoachlineError> {
        let Some(phone) = new.phone.as_deref() else {
            return Ok(None);
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoachlineError::Store(format!("begin failed: {e}")))?;

        let waiting: Option<(String, String)> = sqlx::query_as(
            "SELECT e.id, e.profile FROM entities e \
             JOIN accounts a ON a.client_id = e.id \
             WHERE e.role = 'client' AND e.status = ? AND e.phone = ? AND a.address = e.phone \
             ORDER BY e.created_at LIMIT 1",
        )
        .bind(EntityStatus::Invited.as_str())
        .bind(phone)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| CoachlineError::Store(format!("invited client lookup failed: {e}")))?;

        let Some((id, profile)) = waiting else {
            return Ok(None);
        };

        if address != phone {
            sqlx::query(
                "UPDATE accounts SET client_id = NULL, login_role = NULL, \
                 updated_at = datetime('now') WHERE address = ?",
            )
            .bind(phone)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoachlineError::Store(format!("release placeholder failed: {e}")))?;

            sqlx::query(
                "DELETE FROM accounts WHERE address = ? \
                 AND trainer_id IS NULL AND client_id IS NULL",
            )
            .bind(phone)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoachlineError::Store(format!("drop placeholder failed: {e}")))?;

            claim_link(&mut tx, address, channel, Role::Client).await?;
        }

        sqlx::query(
            "UPDATE accounts SET client_id = ?, login_role = 'client', \
             updated_at = datetime('now') WHERE address = ?",
        )
        .bind(&id)
        .bind(address)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoachlineError::Store(format!("link entity failed: {e}")))?;

        let mut merged: Map<String, Value> = serde_json::from_str(&profile)?;
        merged.extend(new.profile.clone());
        sqlx::query(
            "UPDATE entities SET name = ?, profile = ?, updated_at = datetime('now') \
             WHERE role = 'client' AND id = ?",
        )
        .bind(&new.name)
        .bind(serde_json::to_string(&merged)?)
        .bind(&id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoachlineError::Store(format!("update entity failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| CoachlineError::Store(format!("commit failed: {e}")))?;

        info!("{address} claimed invited client {id}");
        self.get_entity(Role::Client, &id).await
    }

    /// Fetch a profile.
    pub async fn get_entity(&self, role: Role, id: &str) -> Result<Option<Entity>, CoachlineError> {
        let row: Option<EntityRow> = sqlx::query_as(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE role = ? AND id = ?"
        ))
        .bind(role.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoachlineError::Store(format!("get entity failed: {e}")))?;

        row.map(entity_from_row).transpose()
    }

    /// Update one profile field. `name` and `phone` are columns, everything
    /// else lives in the free-form profile map.
    pub async fn update_entity_field(
        &self,
        role: Role,
        id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), CoachlineError> {
        let result = match key {
            "name" | "phone" => sqlx::query(&format!(
                "UPDATE entities SET {key} = ?, updated_at = datetime('now') \
                 WHERE role = ? AND id = ?"
            ))
            .bind(value)
            .bind(role.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| CoachlineError::Store(format!("update entity failed: {e}")))?,
            _ => {
                let entity = self.get_entity(role, id).await?.ok_or_else(|| {
                    CoachlineError::NotFound(format!("{role} {id} does not exist"))
                })?;
                let mut profile = entity.profile;
                profile.insert(key.to_string(), Value::String(value.to_string()));
                sqlx::query(
                    "UPDATE entities SET profile = ?, updated_at = datetime('now') \
                     WHERE role = ? AND id = ?",
                )
                .bind(serde_json::to_string(&profile)?)
                .bind(role.as_str())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| CoachlineError::Store(format!("update entity failed: {e}")))?
            }
        };

        if result.rows_affected() == 0 {
            return Err(CoachlineError::NotFound(format!("{role} {id} does not exist")));
        }
        Ok(())
    }

    /// Delete a profile and everything hanging off it: open edges become
    /// `removed`, their assignments go, a trainer's habits (with logs) go,
    /// and the account link is dropped. Returns whether the profile existed.
    pub async fn delete_entity(&self, role: Role, id: &str) -> Result<bool, CoachlineError> {
        let side = side_column(role);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoachlineError::Store(format!("begin failed: {e}")))?;

        sqlx::query(&format!(
            "UPDATE relationships SET status = 'removed', updated_at = datetime('now') \
             WHERE {side} = ? AND status IN ('pending', 'active')"
        ))
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoachlineError::Store(format!("remove edges failed: {e}")))?;

        sqlx::query(&format!("DELETE FROM habit_assignments WHERE {side} = ?"))
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoachlineError::Store(format!("remove assignments failed: {e}")))?;

        if role == Role::Trainer {
            sqlx::query(
                "DELETE FROM habit_logs WHERE habit_id IN (SELECT id FROM habits WHERE trainer_id = ?)",
            )
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoachlineError::Store(format!("remove habit logs failed: {e}")))?;

            sqlx::query("DELETE FROM habits WHERE trainer_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| CoachlineError::Store(format!("remove habits failed: {e}")))?;
        }

        sqlx::query(&format!(
            "UPDATE accounts SET {side} = NULL, \
             login_role = CASE WHEN login_role = ? THEN NULL ELSE login_role END, \
             updated_at = datetime('now') WHERE {side} = ?"
        ))
        .bind(role.as_str())
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoachlineError::Store(format!("unlink account failed: {e}")))?;

        let deleted = sqlx::query("DELETE FROM entities WHERE role = ? AND id = ?")
            .bind(role.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoachlineError::Store(format!("delete entity failed: {e}")))?
            .rows_affected();

        tx.commit()
            .await
            .map_err(|e| CoachlineError::Store(format!("commit failed: {e}")))?;

        if deleted > 0 {
            info!("deleted {role} {id}");
        }
        Ok(deleted > 0)
    }
}
