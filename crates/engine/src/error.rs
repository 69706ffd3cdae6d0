use std::fmt;

use kolet_store::StoreError;

#[derive(Debug)]
pub enum EngineError {
    Store(StoreError),
    /// The caller's cancel token fired; partial results were discarded.
    Cancelled,
    /// Decimal arithmetic left the representable range.
    Overflow { measure: String },
    /// The query could not be serialized into a cache signature.
    Signature { reason: String },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "{e}"),
            Self::Cancelled => write!(f, "evaluation cancelled"),
            Self::Overflow { measure } => write!(f, "arithmetic overflow aggregating '{measure}'"),
            Self::Signature { reason } => write!(f, "cannot build query signature: {reason}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}
