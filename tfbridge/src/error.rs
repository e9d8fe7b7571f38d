use std::fmt;

use thiserror::Error;

use crate::path::AttributePath;
use crate::protocol::Diagnostic;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to decode value: {0}")]
    Decode(String),

    /// A value could not be coerced into the type required at `path`.
    #[error("{path}: {message}")]
    Convert { path: AttributePath, message: String },

    #[error("unknown resource type {0:?}")]
    UnknownResource(String),

    /// A state upgrade function failed. The whole upgrade is abandoned.
    #[error("failed to upgrade {resource_type} state from schema version {from} to {to}")]
    Upgrade {
        resource_type: String,
        from: i64,
        to: i64,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Diagnostics(#[from] MultiError),

    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn convert(path: &AttributePath, message: impl Into<String>) -> Self {
        Error::Convert {
            path: path.clone(),
            message: message.into(),
        }
    }
}

/// Error diagnostics reported by the wrapped provider runtime for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiError {
    pub errors: Vec<Diagnostic>,
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [single] => write!(f, "{}", single),
            errors => {
                write!(f, "{} errors occurred:", errors.len())?;
                for error in errors {
                    write!(f, "\n\t* {}", error)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for MultiError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_error_display() {
        let single = MultiError {
            errors: vec![Diagnostic::error("bad name", "")],
        };
        assert_eq!(single.to_string(), "bad name");

        let many = MultiError {
            errors: vec![
                Diagnostic::error("bad name", "must be lowercase"),
                Diagnostic::error("bad size", ""),
            ],
        };
        assert_eq!(
            many.to_string(),
            "2 errors occurred:\n\t* bad name: must be lowercase\n\t* bad size"
        );
    }

    #[test]
    fn test_upgrade_error_names_transition() {
        let err = Error::Upgrade {
            resource_type: "example_thing".to_string(),
            from: 1,
            to: 2,
            source: anyhow::anyhow!("boom"),
        };
        assert_eq!(
            err.to_string(),
            "failed to upgrade example_thing state from schema version 1 to 2"
        );
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("boom"));
    }
}
