/// SQL DDL for the task ledger database.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    sequence_number INTEGER NOT NULL,
    mode TEXT NOT NULL,
    status TEXT NOT NULL,
    prompt TEXT NOT NULL,
    reference TEXT,
    model TEXT NOT NULL,
    format TEXT NOT NULL,
    progress INTEGER NOT NULL DEFAULT 0,
    progress_message TEXT,
    artifact_url TEXT,
    thumbnail TEXT,
    attempt INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS usage_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS usage_totals (
    kind TEXT PRIMARY KEY,
    total INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS ledger_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_sequence ON tasks(sequence_number);
CREATE INDEX IF NOT EXISTS idx_usage_kind_at ON usage_events(kind, at_ms);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;

pub const NEXT_SEQUENCE_KEY: &str = "next_sequence";
