use rusqlite::Connection;

use crate::error::Result;

/// Initialise the task schema in `conn`. Safe to call on every startup.
///
/// Runs and results reference their task with `ON DELETE CASCADE`; the
/// cascade only fires when `foreign_keys` is on, which [`configure`] does.
pub fn init_db(conn: &Connection) -> Result<()> {
    configure(conn)?;
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tasks (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            name          TEXT    NOT NULL,
            description   TEXT    NOT NULL DEFAULT '',
            kind          TEXT    NOT NULL,   -- 'script' | 'topic'
            trigger_spec  TEXT    NOT NULL,   -- JSON-encoded TriggerSpec
            payload       TEXT    NOT NULL,
            is_active     INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT    NOT NULL,
            updated_at    TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_tasks_active ON tasks (is_active);

        CREATE TABLE IF NOT EXISTS runs (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id       INTEGER NOT NULL REFERENCES tasks (id) ON DELETE CASCADE,
            status        TEXT    NOT NULL DEFAULT 'running',
            output        TEXT,
            error         TEXT,
            created_at    TEXT    NOT NULL,
            completed_at  TEXT               -- NULL while running
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_runs_task ON runs (task_id, created_at);

        CREATE TABLE IF NOT EXISTS results (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id       INTEGER NOT NULL REFERENCES tasks (id) ON DELETE CASCADE,
            content       TEXT    NOT NULL,
            created_at    TEXT    NOT NULL
        ) STRICT;

        -- Feed and retention queries both filter on created_at.
        CREATE INDEX IF NOT EXISTS idx_results_created ON results (created_at);
        ",
    )?;
    Ok(())
}

/// Per-connection pragmas. SQLite scopes these to the connection, so every
/// connection opened on the database file needs them.
pub fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master
                 WHERE type = 'table' AND name IN ('tasks', 'runs', 'results')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);
    }

    #[test]
    fn foreign_keys_enabled() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let on: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(on, 1);
    }
}
