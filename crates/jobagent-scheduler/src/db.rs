use rusqlite::Connection;

use crate::error::Result;

/// Initialise the job store schema in `conn`. Safe to call on every startup.
///
/// Snapshots are opaque JSON blobs keyed by `<agent name>/<job name>`.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS job_blobs (
            key         TEXT    NOT NULL PRIMARY KEY,
            blob        BLOB    NOT NULL,
            updated_at  TEXT    NOT NULL   -- ISO-8601
        ) STRICT;
        ",
    )?;
    Ok(())
}
