//! Schema migrations, recorded in `_migrations` by version.
//!
//! `AddColumn` migrations are skipped when the column is already there.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
    kind: MigrationKind,
}

enum MigrationKind {
    Standard,
    AddColumn {
        table: &'static str,
        column: &'static str,
    },
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_translations_table",
        sql: include_str!("sql/001_create_translations.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 2,
        description: "create_translation_output_tables",
        sql: include_str!("sql/002_create_translation_output.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 3,
        description: "create_translation_jobs_table",
        sql: include_str!("sql/003_create_translation_jobs.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 4,
        description: "create_chat_messages_table",
        sql: include_str!("sql/004_create_chat_messages.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 5,
        description: "add_heartbeat_to_translation_jobs",
        sql: include_str!("sql/005_add_heartbeat_to_jobs.sql"),
        kind: MigrationKind::AddColumn {
            table: "translation_jobs",
            column: "heartbeat_at",
        },
    },
];

/// Brings the schema up to date. Each migration and its `_migrations` row
/// commit together.
pub fn run_all(conn: &mut Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let applied: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        let tx = conn.transaction()?;
        apply(&tx, migration)?;
        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
        tx.commit()?;
    }

    Ok(())
}

fn apply(conn: &Connection, migration: &Migration) -> Result<(), DatabaseError> {
    if let MigrationKind::AddColumn { table, column } = migration.kind {
        if column_exists(conn, table, column)? {
            log::info!(
                "Migration v{} skipped: {}.{} already present",
                migration.version,
                table,
                column
            );
            return Ok(());
        }
    }

    log::info!(
        "Applying migration v{}: {}",
        migration.version,
        migration.description
    );
    conn.execute_batch(migration.sql)
        .map_err(|e| DatabaseError::Migration {
            version: migration.version,
            reason: e.to_string(),
        })
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        rusqlite::params![table, column],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}
