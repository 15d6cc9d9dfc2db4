//! Lease repository — one `translation_jobs` row per translation.
//!
//! Every ownership change is a single conditional `UPDATE`; callers read
//! the affected row count to learn whether they won.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// A raw lease row from the database.
#[derive(Debug, Clone)]
pub struct LeaseRow {
    pub translation_id: String,
    pub state: String,
    pub worker_token: Option<String>,
    pub attempts: i64,
    pub lease_until: Option<String>,
    pub last_error: Option<String>,
    pub heartbeat_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl LeaseRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            translation_id: row.get("translation_id")?,
            state: row.get("state")?,
            worker_token: row.get("worker_token")?,
            attempts: row.get("attempts")?,
            lease_until: row.get("lease_until")?,
            last_error: row.get("last_error")?,
            heartbeat_at: row.get("heartbeat_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Claimable: pending, or processing with an expired lease.
const CLAIMABLE: &str =
    "(state = 'pending' OR (state = 'processing' AND lease_until IS NOT NULL AND lease_until < :now))";

pub fn insert_pending(conn: &Connection, id: &str, now: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO translation_jobs (translation_id, state, attempts, created_at, updated_at)
         VALUES (?1, 'pending', 0, ?2, ?2)",
        params![id, now],
    )?;
    Ok(())
}

pub fn find(conn: &Connection, id: &str) -> Result<Option<LeaseRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM translation_jobs WHERE translation_id = ?1",
            params![id],
            LeaseRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Claims the lease for `token` if the row is claimable and under the
/// attempt cap. Returns 1 when claimed, 0 otherwise.
pub fn try_claim(
    conn: &Connection,
    id: &str,
    token: &str,
    lease_until: &str,
    now: &str,
    max_attempts: u32,
) -> Result<usize, DatabaseError> {
    let sql = format!(
        "UPDATE translation_jobs
         SET state = 'processing',
             worker_token = :token,
             attempts = attempts + 1,
             lease_until = :until,
             heartbeat_at = :now,
             updated_at = :now
         WHERE translation_id = :id AND {} AND attempts < :max",
        CLAIMABLE
    );
    let affected = conn.execute(
        &sql,
        rusqlite::named_params! {
            ":id": id,
            ":token": token,
            ":until": lease_until,
            ":now": now,
            ":max": max_attempts,
        },
    )?;
    Ok(affected)
}

/// Marks a claimable row that reached the attempt cap as failed.
/// Returns 1 when the row was exhausted by this call.
pub fn exhaust(
    conn: &Connection,
    id: &str,
    message: &str,
    now: &str,
    max_attempts: u32,
) -> Result<usize, DatabaseError> {
    let sql = format!(
        "UPDATE translation_jobs
         SET state = 'failed',
             worker_token = NULL,
             lease_until = NULL,
             last_error = :msg,
             updated_at = :now
         WHERE translation_id = :id AND {} AND attempts >= :max",
        CLAIMABLE
    );
    let affected = conn.execute(
        &sql,
        rusqlite::named_params! {
            ":id": id,
            ":msg": message,
            ":now": now,
            ":max": max_attempts,
        },
    )?;
    Ok(affected)
}

/// Extends the expiry of a lease still owned by `token`.
pub fn renew(
    conn: &Connection,
    id: &str,
    token: &str,
    lease_until: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    let affected = conn.execute(
        "UPDATE translation_jobs
         SET lease_until = ?3, heartbeat_at = ?4, updated_at = ?4
         WHERE translation_id = ?1 AND worker_token = ?2 AND state = 'processing'",
        params![id, token, lease_until, now],
    )?;
    Ok(affected)
}

/// Moves a lease owned by `token` to `state`, clearing ownership.
pub fn release(
    conn: &Connection,
    id: &str,
    token: &str,
    state: &str,
    last_error: Option<&str>,
    now: &str,
) -> Result<usize, DatabaseError> {
    let affected = conn.execute(
        "UPDATE translation_jobs
         SET state = ?3,
             worker_token = NULL,
             lease_until = NULL,
             last_error = COALESCE(?4, last_error),
             updated_at = ?5
         WHERE translation_id = ?1 AND worker_token = ?2 AND state = 'processing'",
        params![id, token, state, last_error, now],
    )?;
    Ok(affected)
}

/// Whether `token` currently owns the processing lease.
pub fn is_held(conn: &Connection, id: &str, token: &str) -> Result<bool, DatabaseError> {
    let held = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM translation_jobs
                        WHERE translation_id = ?1 AND worker_token = ?2 AND state = 'processing')",
        params![id, token],
        |r| r.get(0),
    )?;
    Ok(held)
}

/// Moves an unfinished lease row to a terminal `state` regardless of owner.
/// Used when the translation already finished but its lease row did not.
pub fn settle(conn: &Connection, id: &str, state: &str, now: &str) -> Result<usize, DatabaseError> {
    let affected = conn.execute(
        "UPDATE translation_jobs
         SET state = ?2, worker_token = NULL, lease_until = NULL, updated_at = ?3
         WHERE translation_id = ?1 AND state IN ('pending', 'processing')",
        params![id, state, now],
    )?;
    Ok(affected)
}

/// Claimable job ids, oldest translation first.
pub fn list_claimable(conn: &Connection, now: &str, limit: u32) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT j.translation_id FROM translation_jobs j
         JOIN translations t ON t.id = j.translation_id
         WHERE j.state = 'pending'
            OR (j.state = 'processing' AND j.lease_until IS NOT NULL AND j.lease_until < :now)
         ORDER BY t.created_at ASC, t.rowid ASC
         LIMIT :limit",
    )?;
    let ids = stmt
        .query_map(
            rusqlite::named_params! { ":now": now, ":limit": limit },
            |r| r.get::<_, String>(0),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{translation_repo, Database};

    const T0: &str = "2026-01-01T00:00:00.000000Z";
    const T1: &str = "2026-01-01T00:00:10.000000Z";
    const T2: &str = "2026-01-01T00:01:00.000000Z";

    fn seeded(ids: &[&str]) -> Database {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            for (i, id) in ids.iter().enumerate() {
                let created = format!("2026-01-01T00:00:0{}.000000Z", i);
                translation_repo::insert(
                    conn,
                    &translation_repo::TranslationRow {
                        id: id.to_string(),
                        source_kind: "text".to_string(),
                        input_text: "你好".to_string(),
                        status: "pending".to_string(),
                        progress: 0,
                        total: 0,
                        full_translation: None,
                        error_message: None,
                        created_at: created.clone(),
                        updated_at: created.clone(),
                    },
                )?;
                insert_pending(conn, id, &created)?;
            }
            Ok(())
        })
        .unwrap();
        db
    }

    #[test]
    fn test_claim_is_exclusive_until_expiry() {
        let db = seeded(&["j1"]);
        db.with_conn(|conn| {
            assert_eq!(try_claim(conn, "j1", "a", T1, T0, 3)?, 1);
            assert_eq!(try_claim(conn, "j1", "b", T1, T0, 3)?, 0);
            // After expiry the other token takes over.
            assert_eq!(try_claim(conn, "j1", "b", T2, T2, 3)?, 1);

            let row = find(conn, "j1")?.unwrap();
            assert_eq!(row.worker_token.as_deref(), Some("b"));
            assert_eq!(row.attempts, 2);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_renew_and_release_require_owner() {
        let db = seeded(&["j1"]);
        db.with_conn(|conn| {
            try_claim(conn, "j1", "a", T1, T0, 3)?;
            assert_eq!(renew(conn, "j1", "b", T2, T1)?, 0);
            assert_eq!(renew(conn, "j1", "a", T2, T1)?, 1);
            assert_eq!(release(conn, "j1", "b", "completed", None, T1)?, 0);
            assert_eq!(release(conn, "j1", "a", "completed", None, T1)?, 1);

            let row = find(conn, "j1")?.unwrap();
            assert_eq!(row.state, "completed");
            assert!(row.worker_token.is_none());
            assert!(row.lease_until.is_none());
            assert_eq!(row.heartbeat_at.as_deref(), Some(T1));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_exhaust_only_at_cap() {
        let db = seeded(&["j1"]);
        db.with_conn(|conn| {
            assert_eq!(exhaust(conn, "j1", "attempt limit reached", T0, 1)?, 0);
            try_claim(conn, "j1", "a", T1, T0, 1)?;
            release(conn, "j1", "a", "pending", Some("timeout"), T0)?;

            assert_eq!(try_claim(conn, "j1", "b", T1, T0, 1)?, 0);
            assert_eq!(exhaust(conn, "j1", "attempt limit reached", T0, 1)?, 1);
            let row = find(conn, "j1")?.unwrap();
            assert_eq!(row.state, "failed");
            assert_eq!(row.last_error.as_deref(), Some("attempt limit reached"));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_is_held_tracks_current_owner() {
        let db = seeded(&["j1"]);
        db.with_conn(|conn| {
            assert!(!is_held(conn, "j1", "a")?);
            try_claim(conn, "j1", "a", T1, T0, 3)?;
            assert!(is_held(conn, "j1", "a")?);
            try_claim(conn, "j1", "b", T2, T2, 3)?;
            assert!(!is_held(conn, "j1", "a")?);
            assert!(is_held(conn, "j1", "b")?);

            assert_eq!(settle(conn, "j1", "completed", T2)?, 1);
            assert!(!is_held(conn, "j1", "b")?);
            assert_eq!(settle(conn, "j1", "failed", T2)?, 0);
            assert_eq!(find(conn, "j1")?.unwrap().state, "completed");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_list_claimable_oldest_first() {
        let db = seeded(&["j1", "j2", "j3"]);
        db.with_conn(|conn| {
            try_claim(conn, "j2", "a", T1, T0, 3)?;
            assert_eq!(list_claimable(conn, T0, 10)?, vec!["j1", "j3"]);
            // j2's lease has expired by T2.
            assert_eq!(list_claimable(conn, T2, 10)?, vec!["j1", "j2", "j3"]);
            assert_eq!(list_claimable(conn, T2, 1)?, vec!["j1"]);
            Ok(())
        })
        .unwrap();
    }
}
