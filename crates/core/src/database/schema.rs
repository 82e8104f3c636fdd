pub(super) const STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS dialing_sessions (
        id TEXT PRIMARY KEY,
        concurrency_limit INTEGER NOT NULL,
        from_numbers TEXT NOT NULL,
        status TEXT NOT NULL,
        stats TEXT NOT NULL,
        created_at TEXT NOT NULL,
        started_at TEXT,
        updated_at TEXT NOT NULL,
        ended_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS queue_items (
        id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        contact_id TEXT NOT NULL,
        contact TEXT NOT NULL,
        status TEXT NOT NULL,
        attempt_count INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL,
        priority INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        last_attempt_at TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_queue_items_session_status
        ON queue_items (session_id, status)",
];
