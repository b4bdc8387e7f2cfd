//! SQL schema for the request store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS requests (
    request_id          TEXT PRIMARY KEY,
    subject_email       TEXT NOT NULL,   -- normalised: trimmed, lowercase
    subject_id          TEXT,
    request_type        TEXT NOT NULL,   -- 'export' | 'deletion'
    status              TEXT NOT NULL,   -- 'pending' | 'processing' | 'completed' | 'failed'
    created_at          TEXT NOT NULL,
    processed_at        TEXT,
    download_url        TEXT,
    download_expires_at TEXT,
    reason              TEXT,
    claimed_at          TEXT
);

-- At most one in-flight request per subject and type.
CREATE UNIQUE INDEX IF NOT EXISTS requests_in_flight_idx
    ON requests(subject_email, request_type)
    WHERE status IN ('pending', 'processing');

CREATE INDEX IF NOT EXISTS requests_subject_idx ON requests(subject_id);

-- Per-domain outcome of a deletion, one row per (request, domain).
CREATE TABLE IF NOT EXISTS request_steps (
    request_id    TEXT NOT NULL REFERENCES requests(request_id) ON DELETE CASCADE,
    domain        TEXT NOT NULL,
    status        TEXT NOT NULL,         -- 'deleted' | 'empty' | 'failed'
    deleted_count INTEGER,
    error         TEXT,
    recorded_at   TEXT NOT NULL,
    PRIMARY KEY (request_id, domain)
);

CREATE TABLE IF NOT EXISTS jobs (
    job_id       TEXT PRIMARY KEY,
    request_id   TEXT NOT NULL REFERENCES requests(request_id) ON DELETE CASCADE,
    attempts     INTEGER NOT NULL DEFAULT 0,
    available_at TEXT NOT NULL,
    leased_until TEXT,
    last_error   TEXT,
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS jobs_available_idx ON jobs(available_at);

CREATE TABLE IF NOT EXISTS identities (
    identity_id  TEXT PRIMARY KEY,
    email        TEXT NOT NULL UNIQUE,
    display_name TEXT,
    created_at   TEXT NOT NULL
);

-- Bearer tokens, stored only as SHA-256 hex digests.
CREATE TABLE IF NOT EXISTS credentials (
    token_sha256 TEXT PRIMARY KEY,
    identity_id  TEXT NOT NULL REFERENCES identities(identity_id) ON DELETE CASCADE,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS outbox (
    message_id TEXT PRIMARY KEY,
    recipient  TEXT NOT NULL,
    subject    TEXT NOT NULL,
    body       TEXT NOT NULL,
    created_at TEXT NOT NULL,
    sent_at    TEXT
);

-- Subject-owned data, one table per domain with a common shape.
CREATE TABLE IF NOT EXISTS engagement_events (
    record_id     TEXT PRIMARY KEY,
    subject_id    TEXT,
    subject_email TEXT NOT NULL,
    payload       TEXT NOT NULL,
    created_at    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS assessments (
    record_id     TEXT PRIMARY KEY,
    subject_id    TEXT,
    subject_email TEXT NOT NULL,
    payload       TEXT NOT NULL,
    created_at    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS waitlist_entries (
    record_id     TEXT PRIMARY KEY,
    subject_id    TEXT,
    subject_email TEXT NOT NULL,
    payload       TEXT NOT NULL,
    created_at    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS partner_deals (
    record_id     TEXT PRIMARY KEY,
    subject_id    TEXT,
    subject_email TEXT NOT NULL,
    payload       TEXT NOT NULL,
    created_at    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS role_assignments (
    record_id     TEXT PRIMARY KEY,
    subject_id    TEXT,
    subject_email TEXT NOT NULL,
    payload       TEXT NOT NULL,
    created_at    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS profiles (
    record_id     TEXT PRIMARY KEY,
    subject_id    TEXT,
    subject_email TEXT NOT NULL,
    payload       TEXT NOT NULL,
    created_at    TEXT NOT NULL
);

PRAGMA user_version = 1;
";
