// sqlx::Error -> AppError

use workq_core::error::AppError;

/// Convert sqlx::Error to AppError, decoding the common SQLSTATE classes
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            // https://www.postgresql.org/docs/current/errcodes-appendix.html
            Some("23505") => AppError::Database(format!(
                "Unique constraint violation: {}",
                db_err.message()
            )),
            Some("23514") => AppError::Database(format!(
                "Check constraint violation: {}",
                db_err.message()
            )),
            Some("40001") | Some("40P01") => AppError::Database(format!(
                "Transaction conflict (serialization failure or deadlock): {}",
                db_err.message()
            )),
            Some("57014") => {
                AppError::Database(format!("Query cancelled: {}", db_err.message()))
            }
            Some(code) => {
                AppError::Database(format!("Database error [{}]: {}", code, db_err.message()))
            }
            None => AppError::Database(format!("Database error: {}", db_err.message())),
        },
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        sqlx::Error::PoolTimedOut => {
            AppError::Database("Timed out waiting for a database connection".to_string())
        }
        _ => AppError::Database(err.to_string()),
    }
}
