// sqlx::Error -> AppError mapping

use batchline_core::error::AppError;

// SQLite result codes: https://www.sqlite.org/rescode.html
const CONTENTION_CODES: [&str; 5] = [
    "5",   // SQLITE_BUSY
    "261", // SQLITE_BUSY_RECOVERY
    "517", // SQLITE_BUSY_SNAPSHOT
    "6",   // SQLITE_LOCKED
    "262", // SQLITE_LOCKED_SHAREDCACHE
];

/// Convert sqlx::Error to AppError; busy/locked codes become `Contention`
pub fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();

                if CONTENTION_CODES.contains(&code_str) {
                    return AppError::Contention(format!(
                        "Database locked [{}]: {}",
                        code_str,
                        db_err.message()
                    ));
                }

                match code_str {
                    "2067" | "1555" => AppError::Database(format!(
                        "Unique constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    "13" => AppError::Database(format!("Database full: {}", db_err.message())),
                    _ => AppError::Database(format!(
                        "Database error [{}]: {}",
                        code_str,
                        db_err.message()
                    )),
                }
            } else {
                AppError::Database(format!("Database error: {}", db_err.message()))
            }
        }
        sqlx::Error::PoolTimedOut => {
            AppError::Contention("Timed out waiting for a pooled connection".to_string())
        }
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => AppError::Database(format!("Column not found: {}", col)),
        _ => AppError::Database(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_is_contention() {
        assert!(map_sqlx_error(sqlx::Error::PoolTimedOut).is_contention());
        assert!(!map_sqlx_error(sqlx::Error::RowNotFound).is_contention());
    }
}
