use garde::Validate;

use crate::error::{AppError, Result};

pub mod auth;
pub mod chat;

/// Runs the payload's `garde` rules and folds the report into `AppError::Validation`.
pub fn validate<T>(payload: &T) -> Result<()>
where
    T: Validate,
    T::Context: Default,
{
    payload.validate().map_err(|report| {
        let message = report
            .iter()
            .map(|(path, error)| {
                let path = path.to_string();
                if path.is_empty() {
                    error.to_string()
                } else {
                    format!("{}: {}", path, error)
                }
            })
            .collect::<Vec<_>>()
            .join("; ");
        AppError::Validation(message)
    })
}
