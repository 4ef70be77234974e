//! Accounts: channel address to trainer/client links and the login role.

use super::Store;
use coachline_core::{
    error::CoachlineError,
    model::{Account, Role},
};

type AccountRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
);

const ACCOUNT_COLUMNS: &str = "address, channel, trainer_id, client_id, login_role, created_at";

pub(super) fn account_from_row(row: AccountRow) -> Result<Account, CoachlineError> {
    let (address, channel, trainer_id, client_id, login_role, created_at) = row;
    let login_role = match login_role.as_deref() {
        None => None,
        Some(s) => Some(
            Role::parse(s)
                .ok_or_else(|| CoachlineError::Store(format!("unknown login role '{s}'")))?,
        ),
    };
    Ok(Account {
        address,
        channel,
        trainer_id,
        client_id,
        login_role,
        created_at,
    })
}

fn link_column(role: Role) -> &'static str {
    match role {
        Role::Trainer => "trainer_id",
        Role::Client => "client_id",
    }
}

impl Store {
    /// Look up the account for a channel address.
    pub async fn get_account(&self, address: &str) -> Result<Option<Account>, CoachlineError> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE address = ?"
        ))
        .bind(address)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoachlineError::Store(format!("get account failed: {e}")))?;

        row.map(account_from_row).transpose()
    }

    /// Find the account linked to an entity, used to route notifications.
    pub async fn find_account_for_entity(
        &self,
        role: Role,
        entity_id: &str,
    ) -> Result<Option<Account>, CoachlineError> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE {} = ?",
            link_column(role)
        ))
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoachlineError::Store(format!("find account failed: {e}")))?;

        row.map(account_from_row).transpose()
    }

    /// Set or clear the login role.
    ///
    /// Setting a role the account has no linked entity for is rejected, so the
    /// login role always points at an existing link.
    pub async fn set_login_role(
        &self,
        address: &str,
        role: Option<Role>,
    ) -> Result<(), CoachlineError> {
        let result = match role {
            Some(r) => sqlx::query(&format!(
                "UPDATE accounts SET login_role = ?, updated_at = datetime('now') \
                 WHERE address = ? AND {} IS NOT NULL",
                link_column(r)
            ))
            .bind(r.as_str())
            .bind(address)
            .execute(&self.pool)
            .await,
            None => sqlx::query(
                "UPDATE accounts SET login_role = NULL, updated_at = datetime('now') \
                 WHERE address = ?",
            )
            .bind(address)
            .execute(&self.pool)
            .await,
        }
        .map_err(|e| CoachlineError::Store(format!("set login role failed: {e}")))?;

        if role.is_some() && result.rows_affected() == 0 {
            return Err(CoachlineError::NotFound(format!(
                "no {} profile linked to this account",
                role.map(|r| r.as_str()).unwrap_or_default()
            )));
        }
        Ok(())
    }

    /// Drop the link for `role`, clearing the login role when it pointed there.
    pub async fn unlink_entity(&self, address: &str, role: Role) -> Result<(), CoachlineError> {
        sqlx::query(&format!(
            "UPDATE accounts SET {col} = NULL, \
             login_role = CASE WHEN login_role = ? THEN NULL ELSE login_role END, \
             updated_at = datetime('now') WHERE address = ?",
            col = link_column(role)
        ))
        .bind(role.as_str())
        .bind(address)
        .execute(&self.pool)
        .await
        .map_err(|e| CoachlineError::Store(format!("unlink entity failed: {e}")))?;
        Ok(())
    }
}
