//! Collection file schema.
//!
//! The layout follows the legacy single-file collection format: one `col`
//! row carrying the JSON registries, plus the notes/cards/revlog/graves
//! relations and their indices.

use rusqlite::Connection;

/// Schema version written to `col.ver`.
pub const SCHEMA_VERSION: i64 = 11;

/// Number of indices created by [`INDICES`].
pub const EXPECTED_INDEX_COUNT: i64 = 7;

const TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS col (
    id              integer primary key,
    crt             integer not null,
    mod             integer not null,
    scm             integer not null,
    ver             integer not null,
    dty             integer not null,
    usn             integer not null,
    ls              integer not null,
    conf            text not null,
    models          text not null,
    decks           text not null,
    dconf           text not null,
    tags            text not null
);
CREATE TABLE IF NOT EXISTS notes (
    id              integer primary key,
    guid            text not null,
    mid             integer not null,
    mod             integer not null,
    usn             integer not null,
    tags            text not null,
    flds            text not null,
    sfld            integer not null,
    csum            integer not null,
    flags           integer not null,
    data            text not null
);
CREATE TABLE IF NOT EXISTS cards (
    id              integer primary key,
    nid             integer not null,
    did             integer not null,
    ord             integer not null,
    mod             integer not null,
    usn             integer not null,
    type            integer not null,
    queue           integer not null,
    due             integer not null,
    ivl             integer not null,
    factor          integer not null,
    reps            integer not null,
    lapses          integer not null,
    left            integer not null,
    odue            integer not null,
    odid            integer not null,
    flags           integer not null,
    data            text not null
);
CREATE TABLE IF NOT EXISTS revlog (
    id              integer primary key,
    cid             integer not null,
    usn             integer not null,
    ease            integer not null,
    ivl             integer not null,
    lastIvl         integer not null,
    factor          integer not null,
    time            integer not null,
    type            integer not null
);
CREATE TABLE IF NOT EXISTS graves (
    usn             integer not null,
    oid             integer not null,
    type            integer not null
);
"#;

/// Indices expected on every collection.
pub const INDICES: &str = r#"
CREATE INDEX IF NOT EXISTS ix_notes_usn ON notes (usn);
CREATE INDEX IF NOT EXISTS ix_cards_usn ON cards (usn);
CREATE INDEX IF NOT EXISTS ix_revlog_usn ON revlog (usn);
CREATE INDEX IF NOT EXISTS ix_cards_nid ON cards (nid);
CREATE INDEX IF NOT EXISTS ix_cards_sched ON cards (did, queue, due);
CREATE INDEX IF NOT EXISTS ix_revlog_cid ON revlog (cid);
CREATE INDEX IF NOT EXISTS ix_notes_csum ON notes (csum);
"#;

/// Create tables, indices and the single `col` row on a fresh file.
///
/// Registry blobs are left empty; the collection seeds them on first open.
pub fn create(conn: &Connection, crt: i64, now_ms: i64) -> rusqlite::Result<()> {
    conn.execute_batch(TABLES)?;
    conn.execute_batch(INDICES)?;
    conn.execute(
        "INSERT OR IGNORE INTO col VALUES (1, ?1, ?2, ?2, ?3, 0, 0, 0, '{}', '{}', '{}', '{}', '{}')",
        rusqlite::params![crt, now_ms, SCHEMA_VERSION],
    )?;
    conn.execute_batch("ANALYZE")?;
    Ok(())
}
