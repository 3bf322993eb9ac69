/// Idempotent schema, applied once per connect.
pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS validator_efficiency (
    day           TEXT    NOT NULL,
    timestamp     INTEGER NOT NULL,
    validator_id  TEXT    NOT NULL,
    group_id      INTEGER NOT NULL,
    efficiency    REAL    NOT NULL,
    stake         INTEGER NOT NULL,
    weight        INTEGER NOT NULL,
    idx           INTEGER NOT NULL,
    pubkey_hash   TEXT    NOT NULL,
    valid_since   INTEGER NOT NULL,
    valid_until   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS validator_efficiency_order
    ON validator_efficiency (validator_id, group_id, timestamp);
CREATE INDEX IF NOT EXISTS validator_efficiency_day
    ON validator_efficiency (day, timestamp);

CREATE TABLE IF NOT EXISTS validator_status_history (
    validator_id  TEXT    NOT NULL,
    group_id      INTEGER,
    timestamp     INTEGER NOT NULL,
    status        TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS validator_status_history_order
    ON validator_status_history (validator_id, timestamp);

CREATE TABLE IF NOT EXISTS groups (
    group_id      INTEGER PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS group_info (
    group_id      INTEGER PRIMARY KEY,
    valid_since   INTEGER NOT NULL,
    valid_until   INTEGER NOT NULL,
    total_weight  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS validators (
    group_id      INTEGER NOT NULL,
    validator_id  TEXT    NOT NULL,
    pubkey        TEXT    NOT NULL,
    weight        INTEGER NOT NULL,
    idx           INTEGER NOT NULL,
    stake         INTEGER NOT NULL,
    max_factor    INTEGER NOT NULL,
    wallet        TEXT    NOT NULL,
    PRIMARY KEY (group_id, validator_id)
);
"#;
