use std::fmt;

#[derive(Debug)]
pub enum SchemaError {
    /// TOML parse / deserialization error.
    Parse(String),
    /// Definition is well-formed TOML but violates a schema invariant.
    Validation { schema: String, message: String },
    /// Two fields claim the same raw column header.
    DuplicateAlias { alias: String, first: String, second: String },
    /// A reference to a field that the schema does not define.
    UnknownField { context: String, field: String },
    /// IO error while loading schema files.
    Io(String),
}

impl SchemaError {
    pub(crate) fn validation(schema: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            schema: schema.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "schema parse error: {msg}"),
            Self::Validation { schema, message } => {
                write!(f, "schema '{schema}': {message}")
            }
            Self::DuplicateAlias { alias, first, second } => {
                write!(f, "column '{alias}' is claimed by both '{first}' and '{second}'")
            }
            Self::UnknownField { context, field } => {
                write!(f, "{context}: unknown field '{field}'")
            }
            Self::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for SchemaError {}
