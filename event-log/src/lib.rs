//! SQL event logging.
//!
//! The pipeline's contract with a database is tiny: execute an
//! already-template-expanded statement when an event happens, remember the
//! insert id from the event-start statement, and survive outages. Error
//! codes at or above [`CONNECTION_LOST_CODE`] are treated as a lost
//! connection: reconnect once, retry once, then drop the query.

use std::path::PathBuf;

use tracing::{debug, warn};

/// Error codes at or above this value indicate the connection itself
/// failed rather than the statement.
pub const CONNECTION_LOST_CODE: u32 = 2000;

#[derive(thiserror::Error, Debug)]
#[error("database error {code}: {message}")]
pub struct DbError {
    pub code: u32,
    pub message: String,
}

impl DbError {
    pub fn is_connection_lost(&self) -> bool {
        self.code >= CONNECTION_LOST_CODE
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

/// A database client. One per process per backend, serialized by the
/// caller.
pub trait EventDb: Send {
    fn execute(&mut self, sql: &str) -> Result<()>;
    /// Execute an INSERT and return the generated row id (0 when the
    /// backend cannot say).
    fn execute_returning_id(&mut self, sql: &str) -> Result<u64>;
    fn reconnect(&mut self) -> Result<()>;
}

/// Applies the reconnect-once policy on top of any [`EventDb`] and tracks
/// the best-effort `%{dbeventid}` value.
pub struct EventLogger {
    db: Box<dyn EventDb>,
    last_event_id: u64,
}

impl EventLogger {
    pub fn new(db: Box<dyn EventDb>) -> Self {
        Self {
            db,
            last_event_id: 0,
        }
    }

    /// The insert id captured by the most recent
    /// [`run_start`](Self::run_start); 0 when unknown.
    pub fn last_event_id(&self) -> u64 {
        self.last_event_id
    }

    /// Execute a statement; failures are logged and swallowed so event
    /// dispatch never depends on the database being up.
    pub fn run(&mut self, sql: &str) {
        debug!(sql, "event query");
        if let Err(e) = self.execute_with_retry(sql) {
            warn!("dropping event query after failure: {e}");
        }
    }

    /// Execute the event-start statement and capture its insert id.
    pub fn run_start(&mut self, sql: &str) {
        debug!(sql, "event start query");
        self.last_event_id = 0;
        match self.db.execute_returning_id(sql) {
            Ok(id) => self.last_event_id = id,
            Err(e) if e.is_connection_lost() => {
                if self.db.reconnect().is_ok() {
                    match self.db.execute_returning_id(sql) {
                        Ok(id) => self.last_event_id = id,
                        Err(e) => warn!("dropping event-start query after retry: {e}"),
                    }
                } else {
                    warn!("database reconnect failed, dropping event-start query");
                }
            }
            Err(e) => warn!("dropping event-start query: {e}"),
        }
    }

    fn execute_with_retry(&mut self, sql: &str) -> Result<()> {
        match self.db.execute(sql) {
            Ok(()) => Ok(()),
            Err(e) if e.is_connection_lost() => {
                warn!("database connection lost ({e}), reconnecting once");
                self.db.reconnect()?;
                self.db.execute(sql)
            }
            Err(e) => Err(e),
        }
    }
}

// ---------------------------
// sqlite backend

pub struct SqliteDb {
    path: PathBuf,
    conn: rusqlite::Connection,
}

impl SqliteDb {
    pub fn open(path: PathBuf) -> Result<Self> {
        let conn = rusqlite::Connection::open(&path).map_err(map_sqlite_err)?;
        Ok(Self { path, conn })
    }
}

fn map_sqlite_err(e: rusqlite::Error) -> DbError {
    let code = match &e {
        rusqlite::Error::SqliteFailure(ffi_err, _) => ffi_err.extended_code as u32,
        _ => 1,
    };
    DbError {
        code,
        message: e.to_string(),
    }
}

impl EventDb for SqliteDb {
    fn execute(&mut self, sql: &str) -> Result<()> {
        self.conn
            .execute_batch(sql)
            .map_err(map_sqlite_err)
    }

    fn execute_returning_id(&mut self, sql: &str) -> Result<u64> {
        self.conn.execute_batch(sql).map_err(map_sqlite_err)?;
        Ok(self.conn.last_insert_rowid() as u64)
    }

    fn reconnect(&mut self) -> Result<()> {
        self.conn = rusqlite::Connection::open(&self.path).map_err(map_sqlite_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> SqliteDb {
        let dir = tempfile::tempdir().unwrap();
        // Keep the tempdir alive by leaking it for the test's duration.
        let path = dir.keep().join("events.db");
        let mut db = SqliteDb::open(path).unwrap();
        db.execute(
            "CREATE TABLE security (camera INT, event INT, frame INT, filename TEXT, file_type INT)",
        )
        .unwrap();
        db
    }

    #[test]
    fn test_insert_and_id() {
        let mut db = test_db();
        let id = db
            .execute_returning_id("INSERT INTO security (camera, event) VALUES (1, 7)")
            .unwrap();
        assert_eq!(id, 1);
        let id = db
            .execute_returning_id("INSERT INTO security (camera, event) VALUES (1, 8)")
            .unwrap();
        assert_eq!(id, 2);
    }

    #[test]
    fn test_logger_swallows_bad_sql() {
        let mut logger = EventLogger::new(Box::new(test_db()));
        logger.run("INSERT INTO nonexistent VALUES (1)");
        logger.run_start("ALSO NOT SQL");
        assert_eq!(logger.last_event_id(), 0);
    }

    #[test]
    fn test_logger_captures_start_id() {
        let mut logger = EventLogger::new(Box::new(test_db()));
        logger.run_start("INSERT INTO security (camera, event) VALUES (2, 1)");
        assert_eq!(logger.last_event_id(), 1);
    }

    /// Fails every statement with a connection-lost code until reconnected.
    struct FlakyDb {
        lost: bool,
        executed: Vec<String>,
        reconnects: u32,
    }

    impl EventDb for FlakyDb {
        fn execute(&mut self, sql: &str) -> Result<()> {
            if self.lost {
                return Err(DbError {
                    code: 2006,
                    message: "server has gone away".to_string(),
                });
            }
            self.executed.push(sql.to_string());
            Ok(())
        }

        fn execute_returning_id(&mut self, sql: &str) -> Result<u64> {
            self.execute(sql)?;
            Ok(99)
        }

        fn reconnect(&mut self) -> Result<()> {
            self.reconnects += 1;
            self.lost = false;
            Ok(())
        }
    }

    #[test]
    fn test_reconnect_once_policy() {
        let mut logger = EventLogger::new(Box::new(FlakyDb {
            lost: true,
            executed: Vec::new(),
            reconnects: 0,
        }));
        logger.run("INSERT INTO security VALUES (1)");
        logger.run_start("INSERT INTO security VALUES (2)");
        assert_eq!(logger.last_event_id(), 99);
    }
}
