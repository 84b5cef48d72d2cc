use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::{is_unique_violation, RecoveryError, Result};
use crate::model::{Owner, Role};

pub fn create_owner(conn: &Connection, username: &str, role: Role, branch: &str) -> Result<Owner> {
    let username = username.trim();
    if username.is_empty() {
        return Err(RecoveryError::validation("username must not be empty"));
    }
    let owner = Owner {
        owner_id: Uuid::new_v4().to_string(),
        username: username.to_string(),
        role,
        branch: branch.trim().to_string(),
    };
    conn.execute(
        "INSERT INTO owners(id, username, role, branch) VALUES(?, ?, ?, ?)",
        (&owner.owner_id, &owner.username, owner.role.as_str(), &owner.branch),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            RecoveryError::Conflict(format!("username {} already exists", owner.username))
        } else {
            e.into()
        }
    })?;
    Ok(owner)
}

pub fn get_owner(conn: &Connection, owner_id: &str) -> Result<Option<Owner>> {
    let row = conn
        .query_row(
            "SELECT id, username, role, branch FROM owners WHERE id = ?",
            [owner_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;
    Ok(row.map(|(id, username, role, branch)| Owner {
        owner_id: id,
        username,
        role: Role::parse(&role).unwrap_or(Role::User),
        branch,
    }))
}

/// Owners ordered by username; admins are optional since they never
/// hold customers in practice.
pub fn list_owners(conn: &Connection, include_admins: bool) -> Result<Vec<Owner>> {
    let mut stmt = conn.prepare("SELECT id, username, role, branch FROM owners ORDER BY username")?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .map(|(id, username, role, branch)| Owner {
            owner_id: id,
            username,
            role: Role::parse(&role).unwrap_or(Role::User),
            branch,
        })
        .filter(|o| include_admins || o.role != Role::Admin)
        .collect())
}
