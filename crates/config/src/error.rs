use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    Io { path: String, reason: String },
    Parse { path: String, reason: String },
    /// An environment override did not parse.
    Env { var: String, value: String },
    Invalid { key: String, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, reason } => write!(f, "{path}: {reason}"),
            Self::Parse { path, reason } => write!(f, "{path}: invalid settings: {reason}"),
            Self::Env { var, value } => write!(f, "{var}: cannot use '{value}'"),
            Self::Invalid { key, message } => write!(f, "setting '{key}': {message}"),
        }
    }
}

impl std::error::Error for ConfigError {}
