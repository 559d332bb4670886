//! Error types for policy compilation and evaluation

use thiserror::Error;

/// Policy compiler error types
#[derive(Debug, Error)]
pub enum Error {
    /// Two policies with the same id were added to one collection
    #[error("duplicate policy id {id} in collection {collection}")]
    DuplicatePolicyId {
        /// Collection name
        collection: String,
        /// Conflicting policy id
        id: String,
    },

    /// A compiled policy could not be converted into a Cedar policy
    #[error("policy conversion error for {id}: {message}")]
    PolicyConversion {
        /// Policy id
        id: String,
        /// Error message
        message: String,
    },

    /// Cedar policy text could not be parsed
    #[error("policy parse error in {source_name}: {message}")]
    PolicyParse {
        /// Name of the store or file the text came from
        source_name: String,
        /// Error message
        message: String,
    },

    /// Request, context or entity data could not be built
    #[error("request error: {message}")]
    Request {
        /// Error message
        message: String,
    },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a duplicate policy id error
    pub fn duplicate_policy_id(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::DuplicatePolicyId {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Create a policy conversion error
    pub fn conversion(id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::PolicyConversion {
            id: id.into(),
            message: msg.into(),
        }
    }

    /// Create a policy parse error
    pub fn parse(source_name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::PolicyParse {
            source_name: source_name.into(),
            message: msg.into(),
        }
    }

    /// Create a request error
    pub fn request(msg: impl Into<String>) -> Self {
        Self::Request {
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Check if this error points at a renderer bug rather than bad input
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::PolicyConversion { .. } | Error::Json(_))
    }
}

/// Result type for policy operations
pub type Result<T> = std::result::Result<T, Error>;
