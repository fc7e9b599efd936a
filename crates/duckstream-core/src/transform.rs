//! Transform Stage
//!
//! Defines the view that the streamers read from. Views are temporary
//! (connection-scoped), so repeated queries against a persistent session
//! replace each other and never change the session file.
//!
//! ## Trust boundary
//!
//! Caller SQL and table names are interpolated into the statement verbatim.
//! No sanitisation or parameterisation is performed: callers of this service
//! are trusted to run arbitrary SQL against their own session.

use tracing::debug;

use crate::engine::Engine;
use crate::error::{Error, Result};

/// Name of the view every pipeline defines.
pub const RESULT_VIEW: &str = "v_result";

/// The body of the result view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transform {
    /// `SELECT * FROM <table>`
    Identity { table: String },
    /// Caller-supplied SQL, used as-is.
    Sql(String),
}

impl Transform {
    /// Caller SQL when given, otherwise the whole table.
    pub fn sql_or_identity(query: &str, table: &str) -> Self {
        if query.trim().is_empty() {
            Transform::Identity {
                table: table.to_string(),
            }
        } else {
            Transform::Sql(query.to_string())
        }
    }

    pub fn to_sql(&self) -> String {
        match self {
            Transform::Identity { table } => format!("SELECT * FROM {}", table),
            Transform::Sql(sql) => sql.trim().trim_end_matches(';').to_string(),
        }
    }
}

/// `CREATE OR REPLACE TEMP VIEW <view> AS <transform>`
pub fn define_view(engine: &Engine, view: &str, transform: &Transform) -> Result<()> {
    let body = transform.to_sql();
    if body.is_empty() {
        return Err(Error::InvalidArgument("query is empty".to_string()));
    }

    debug!(view = %view, sql = %body, "Creating view for the transformation query");
    engine
        .exec(&format!("CREATE OR REPLACE TEMP VIEW {} AS {};", view, body))
        .map_err(|e| Error::Transform(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;
    use std::path::Path;

    fn engine_in(dir: &Path) -> Engine {
        let spill = dir.join("spill");
        std::fs::create_dir_all(&spill).unwrap();
        let engine =
            Engine::open(&dir.join("transform.duckdb"), &EngineSettings::new(spill)).unwrap();
        engine
            .exec("CREATE TABLE trips AS SELECT range AS id, range % 3 AS zone FROM range(9)")
            .unwrap();
        engine
    }

    fn count(engine: &Engine, sql: &str) -> i64 {
        engine
            .query_rows(sql, |row| row.get::<_, i64>(0))
            .unwrap()[0]
    }

    #[test]
    fn test_sql_or_identity() {
        assert_eq!(
            Transform::sql_or_identity("  ", "trips"),
            Transform::Identity {
                table: "trips".to_string()
            }
        );
        assert_eq!(
            Transform::sql_or_identity("SELECT 1;", "trips").to_sql(),
            "SELECT 1"
        );
    }

    #[test]
    fn test_identity_view_exposes_table() {
        let temp = tempfile::tempdir().unwrap();
        let engine = engine_in(temp.path());
        define_view(
            &engine,
            RESULT_VIEW,
            &Transform::Identity {
                table: "trips".to_string(),
            },
        )
        .unwrap();
        assert_eq!(count(&engine, "SELECT COUNT(*) FROM v_result"), 9);
    }

    #[test]
    fn test_view_is_replaced_on_redefinition() {
        let temp = tempfile::tempdir().unwrap();
        let engine = engine_in(temp.path());

        define_view(
            &engine,
            RESULT_VIEW,
            &Transform::Sql("SELECT * FROM trips WHERE zone = 0".to_string()),
        )
        .unwrap();
        assert_eq!(count(&engine, "SELECT COUNT(*) FROM v_result"), 3);

        define_view(
            &engine,
            RESULT_VIEW,
            &Transform::Sql("SELECT * FROM trips WHERE id < 8".to_string()),
        )
        .unwrap();
        assert_eq!(count(&engine, "SELECT COUNT(*) FROM v_result"), 8);
    }

    #[test]
    fn test_view_is_not_persisted_in_session_file() {
        let temp = tempfile::tempdir().unwrap();
        let engine = engine_in(temp.path());
        define_view(&engine, RESULT_VIEW, &Transform::Sql("SELECT 1 AS x".to_string())).unwrap();
        engine.close().unwrap();

        let engine = Engine::open(
            &temp.path().join("transform.duckdb"),
            &EngineSettings::new(temp.path().join("spill")),
        )
        .unwrap();
        assert!(engine.exec("SELECT * FROM v_result").is_err());
    }

    #[test]
    fn test_bad_sql_is_transform_error() {
        let temp = tempfile::tempdir().unwrap();
        let engine = engine_in(temp.path());
        let err = define_view(
            &engine,
            RESULT_VIEW,
            &Transform::Sql("SELEC oops FROM".to_string()),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Transform(_)));
    }

    #[test]
    fn test_empty_sql_is_invalid_argument() {
        let temp = tempfile::tempdir().unwrap();
        let engine = engine_in(temp.path());
        let err = define_view(&engine, RESULT_VIEW, &Transform::Sql(";".to_string())).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
