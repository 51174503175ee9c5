//! Lookups against the user directory and memo relations.

use std::collections::HashSet;

use chrono::{Duration, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use uuid::Uuid;

use super::error::{WorkflowError, WorkflowResult};
use super::policy::Actor;
use crate::models::{Department, Memo, NewMemoRecipient, User};
use crate::schema::{departments, memo_recipients, memos, users};

pub fn load_user(conn: &mut PgConnection, user_id: Uuid) -> WorkflowResult<User> {
    users::table
        .find(user_id)
        .first::<User>(conn)
        .optional()?
        .ok_or(WorkflowError::NotFound("user"))
}

pub fn load_actor(conn: &mut PgConnection, user_id: Uuid) -> WorkflowResult<Actor> {
    Actor::from_user(&load_user(conn, user_id)?)
}

pub fn load_department(
    conn: &mut PgConnection,
    department_id: Uuid,
) -> WorkflowResult<Option<Department>> {
    Ok(departments::table
        .find(department_id)
        .first::<Department>(conn)
        .optional()?)
}

/// Director of an active department, if one is assigned.
pub fn department_director(
    conn: &mut PgConnection,
    department_id: Option<Uuid>,
) -> WorkflowResult<Option<Uuid>> {
    let Some(department_id) = department_id else {
        return Ok(None);
    };
    let director = departments::table
        .find(department_id)
        .filter(departments::active.eq(true))
        .select(departments::director_id)
        .first::<Option<Uuid>>(conn)
        .optional()?;
    Ok(director.flatten())
}

pub fn load_memo(conn: &mut PgConnection, memo_id: Uuid) -> WorkflowResult<Memo> {
    memos::table
        .find(memo_id)
        .first::<Memo>(conn)
        .optional()?
        .ok_or(WorkflowError::NotFound("memo"))
}

/// Loads the memo and holds its row lock until the enclosing transaction ends.
pub fn lock_memo(conn: &mut PgConnection, memo_id: Uuid) -> WorkflowResult<Memo> {
    memos::table
        .find(memo_id)
        .for_update()
        .first::<Memo>(conn)
        .optional()?
        .ok_or(WorkflowError::NotFound("memo"))
}

pub fn recipient_ids(conn: &mut PgConnection, memo_id: Uuid) -> WorkflowResult<Vec<Uuid>> {
    Ok(memo_recipients::table
        .filter(memo_recipients::memo_id.eq(memo_id))
        .order(memo_recipients::added_at.asc())
        .select(memo_recipients::user_id)
        .load::<Uuid>(conn)?)
}

pub fn recipients(conn: &mut PgConnection, memo_id: Uuid) -> WorkflowResult<Vec<User>> {
    Ok(memo_recipients::table
        .inner_join(users::table)
        .filter(memo_recipients::memo_id.eq(memo_id))
        .order(memo_recipients::added_at.asc())
        .select(users::all_columns)
        .load::<User>(conn)?)
}

/// Deduplicates `ids` keeping first occurrences and fails if any is unknown.
pub fn ensure_users_exist(conn: &mut PgConnection, ids: &[Uuid]) -> WorkflowResult<Vec<Uuid>> {
    let mut seen = HashSet::new();
    let unique: Vec<Uuid> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
    if unique.is_empty() {
        return Ok(unique);
    }
    let found: i64 = users::table
        .filter(users::id.eq_any(&unique))
        .count()
        .get_result(conn)?;
    if found as usize != unique.len() {
        return Err(WorkflowError::UnknownUsers);
    }
    Ok(unique)
}

/// Replaces the recipient links of `memo_id` with `ids`, in order.
pub fn replace_recipients(
    conn: &mut PgConnection,
    memo_id: Uuid,
    ids: &[Uuid],
) -> WorkflowResult<()> {
    diesel::delete(memo_recipients::table.filter(memo_recipients::memo_id.eq(memo_id)))
        .execute(conn)?;
    if ids.is_empty() {
        return Ok(());
    }
    // added_at orders recipients; NOW() is constant inside a transaction.
    let base = Utc::now().naive_utc();
    let rows: Vec<NewMemoRecipient> = ids
        .iter()
        .enumerate()
        .map(|(index, user_id)| NewMemoRecipient {
            memo_id,
            user_id: *user_id,
            added_at: base + Duration::microseconds(index as i64),
        })
        .collect();
    diesel::insert_into(memo_recipients::table)
        .values(&rows)
        .execute(conn)?;
    Ok(())
}
