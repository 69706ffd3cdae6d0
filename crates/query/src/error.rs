use std::fmt;

use kolet_engine::EngineError;

#[derive(Debug)]
pub enum QueryError {
    /// A field is missing from the schema or has the wrong role.
    UnknownField { field: String, expected: &'static str },
    UnknownTemplate(String),
    MissingParam { template: String, param: String },
    InvalidParam { param: String, value: String, reason: String },
    Engine(EngineError),
}

impl QueryError {
    pub(crate) fn invalid(param: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParam {
            param: param.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownField { field, expected } => write!(f, "unknown {expected} '{field}'"),
            Self::UnknownTemplate(name) => write!(f, "unknown template '{name}'"),
            Self::MissingParam { template, param } => {
                write!(f, "template '{template}' requires parameter '{param}'")
            }
            Self::InvalidParam { param, value, reason } => {
                write!(f, "invalid value '{value}' for '{param}': {reason}")
            }
            Self::Engine(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Engine(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EngineError> for QueryError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}
