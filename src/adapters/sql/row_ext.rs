//! Typed accessors for reading domain fields out of result rows.

use chrono::{DateTime, Utc};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Row, SqlValue};

pub trait RowExt {
    fn value(&self, column: &str) -> &SqlValue;

    fn text(&self, column: &str) -> DomainResult<String> {
        match self.value(column) {
            SqlValue::Null => Err(missing(column)),
            other => Ok(other.to_string()),
        }
    }

    fn opt_text(&self, column: &str) -> Option<String> {
        match self.value(column) {
            SqlValue::Null => None,
            other => Some(other.to_string()),
        }
    }

    fn int(&self, column: &str) -> DomainResult<i64> {
        self.value(column)
            .as_i64()
            .ok_or_else(|| invalid(column, "integer"))
    }

    fn float(&self, column: &str) -> DomainResult<f64> {
        self.value(column)
            .as_f64()
            .ok_or_else(|| invalid(column, "number"))
    }

    fn datetime(&self, column: &str) -> DomainResult<DateTime<Utc>> {
        self.value(column)
            .as_datetime()
            .ok_or_else(|| invalid(column, "timestamp"))
    }

    fn opt_datetime(&self, column: &str) -> DomainResult<Option<DateTime<Utc>>> {
        match self.value(column) {
            SqlValue::Null => Ok(None),
            other => other
                .as_datetime()
                .map(Some)
                .ok_or_else(|| invalid(column, "timestamp")),
        }
    }
}

static NULL: SqlValue = SqlValue::Null;

impl RowExt for Row {
    fn value(&self, column: &str) -> &SqlValue {
        self.get(column).unwrap_or(&NULL)
    }
}

fn missing(column: &str) -> DomainError {
    DomainError::DataError(format!("column {column} is missing or NULL"))
}

fn invalid(column: &str, expected: &str) -> DomainError {
    DomainError::DataError(format!("column {column} is not a valid {expected}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::value::row;

    #[test]
    fn test_accessors() {
        let r = row([
            ("id", SqlValue::Integer(3)),
            ("name", SqlValue::from("x")),
            ("at", SqlValue::from("2025-01-01 00:00:00.000000+00:00")),
            ("gone", SqlValue::Null),
        ]);

        assert_eq!(r.int("id").unwrap(), 3);
        assert_eq!(r.text("name").unwrap(), "x");
        assert!(r.datetime("at").is_ok());
        assert_eq!(r.opt_datetime("gone").unwrap(), None);
        assert!(r.text("gone").is_err());
        assert!(r.int("name").is_err());
        assert_eq!(r.opt_text("absent"), None);
    }
}
