// Error types for the rule-table engine

use thiserror::Error;

/// Errors raised by [`crate::Iptables`] implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IptablesError {
    /// The named table does not exist.
    #[error("table {table} does not exist")]
    TableNotFound {
        /// Missing table name.
        table: String,
    },

    /// The table exists but the named chain does not.
    #[error("chain {table}/{chain} does not exist")]
    ChainNotFound {
        /// Table that was searched.
        table: String,
        /// Missing chain name.
        chain: String,
    },

    /// A rule specification or restore line could not be parsed.
    #[error("malformed input: {message}")]
    MalformedInput {
        /// Description of what was wrong.
        message: String,
    },

    /// An argument was outside the accepted set of values.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the rejected argument.
        message: String,
    },
}

impl IptablesError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput {
            message: message.into(),
        }
    }

    /// Returns true for either of the lookup failures.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::TableNotFound { .. } | Self::ChainNotFound { .. }
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IptablesError>;
