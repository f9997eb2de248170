use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: i64 = 1;

pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;

    // Lessons keep catalog order through rowid; the upsert in the store
    // never deletes a lesson row so re-imports stay in place.
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS lessons (
            id             TEXT PRIMARY KEY,
            title          TEXT NOT NULL,
            description    TEXT NOT NULL DEFAULT '',
            estimated_time INTEGER NOT NULL DEFAULT 0,
            tags           TEXT NOT NULL DEFAULT '[]'
        );

        CREATE TABLE IF NOT EXISTS chapters (
            lesson_id      TEXT NOT NULL REFERENCES lessons(id) ON DELETE CASCADE,
            id             INTEGER NOT NULL,
            title          TEXT NOT NULL,
            description    TEXT NOT NULL DEFAULT '',
            estimated_time INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (lesson_id, id)
        );

        CREATE TABLE IF NOT EXISTS pages (
            lesson_id  TEXT NOT NULL,
            chapter_id INTEGER NOT NULL,
            position   INTEGER NOT NULL,
            page_id    INTEGER NOT NULL,
            kind       TEXT NOT NULL,
            title      TEXT NOT NULL,
            body       TEXT NOT NULL,
            PRIMARY KEY (lesson_id, chapter_id, position),
            FOREIGN KEY (lesson_id, chapter_id)
                REFERENCES chapters(lesson_id, id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_pages_chapter ON pages(lesson_id, chapter_id);
        ",
    )?;

    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}
