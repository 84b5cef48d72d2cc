use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "recovery.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace.to_string_lossy()
        )
    })?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS owners(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL,
            branch TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS customers(
            record_id TEXT PRIMARY KEY,
            account_number TEXT NOT NULL UNIQUE,
            sr_no TEXT NOT NULL DEFAULT '',
            branch TEXT NOT NULL,
            customer_name TEXT NOT NULL,
            product_type TEXT NOT NULL DEFAULT '',
            scheme_code TEXT NOT NULL DEFAULT '',
            sanction_limit REAL NOT NULL DEFAULT 0,
            date_of_npa TEXT,
            outstanding_balance REAL NOT NULL DEFAULT 0,
            principal_overdue REAL NOT NULL DEFAULT 0,
            interest_overdue REAL NOT NULL DEFAULT 0,
            net_balance REAL NOT NULL DEFAULT 0,
            provision TEXT NOT NULL DEFAULT '',
            asset_classification TEXT NOT NULL DEFAULT '',
            contact_no TEXT NOT NULL DEFAULT '',
            address TEXT NOT NULL DEFAULT '',
            assigned_owner_id TEXT,
            is_recovered INTEGER NOT NULL DEFAULT 0,
            recovery_date TEXT,
            recovered_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(assigned_owner_id) REFERENCES owners(id)
        )",
        [],
    )?;
    ensure_customers_recovered_by(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_customers_branch_recovered ON customers(branch, is_recovered)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_customers_owner ON customers(assigned_owner_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_customers_date_of_npa ON customers(date_of_npa)",
        [],
    )?;

    // Append-only: rows are never updated, only removed with their customer.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS customer_locations(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            record_id TEXT NOT NULL,
            lat REAL NOT NULL,
            lng REAL NOT NULL,
            captured_at TEXT NOT NULL,
            captured_by TEXT,
            FOREIGN KEY(record_id) REFERENCES customers(record_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_customer_locations_record ON customer_locations(record_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS visits(
            id TEXT PRIMARY KEY,
            record_id TEXT NOT NULL,
            owner_id TEXT,
            feedback_text TEXT NOT NULL,
            image_url TEXT,
            lat REAL NOT NULL DEFAULT 0,
            lng REAL NOT NULL DEFAULT 0,
            visit_date TEXT NOT NULL,
            FOREIGN KEY(record_id) REFERENCES customers(record_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_visits_record ON visits(record_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_visits_owner ON visits(owner_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

// Workspaces created before recovery attribution existed lack this column.
fn ensure_customers_recovered_by(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "customers", "recovered_by")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE customers ADD COLUMN recovered_by TEXT", [])?;
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("corrupt setting {}", key))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn settings_delete(conn: &Connection, key: &str) -> anyhow::Result<()> {
    conn.execute("DELETE FROM settings WHERE key = ?", [key])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
