use thiserror::Error;

/// Main error type for the watchtower agent
#[derive(Error, Debug)]
pub enum WatchtowerError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Order book error: {0}")]
    OrderBook(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Typed-data codec errors
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    // Round protocol violations
    #[error("Round error: {0}")]
    Round(#[from] RoundError),

    // State machine errors
    #[error("Unreachable transition: no transition from {round} on {event}")]
    UnreachableTransition { round: String, event: String },

    #[error("Invalid transition table: {0}")]
    InvalidTransitionTable(String),

    #[error("Missing key in replicated state: {0}")]
    MissingKey(String),

    #[error("Invalid replicated value for '{key}': {reason}")]
    InvalidStateValue { key: String, reason: String },

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Address parsing error: {0}")]
    AddressParsing(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WatchtowerError {
    /// Configuration errors must stop the agent instead of letting it run on
    /// with a state machine that can no longer agree with its peers.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WatchtowerError::Config(_)
                | WatchtowerError::InvalidConfig(_)
                | WatchtowerError::UnreachableTransition { .. }
                | WatchtowerError::InvalidTransitionTable(_)
        )
    }
}

/// Result type alias for WatchtowerError
pub type Result<T> = std::result::Result<T, WatchtowerError>;

/// Errors raised by the typed-data codec. These abort processing of a single
/// order; callers catch them per order.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid typed-data domain key: '{0}'")]
    InvalidDomainField(String),

    #[error("Invalid order UID length")]
    InvalidUidLength { actual: usize },

    #[error("Unknown {kind}: {hash}")]
    UnknownEnumHash { kind: &'static str, hash: String },

    #[error("Value out of range for {ty}: {value}")]
    ValueOutOfRange { ty: String, value: String },

    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Missing field '{field}' in struct {ty}")]
    MissingField { ty: String, field: String },

    #[error("Invalid value for field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Invalid keeper queue encoding: {0}")]
    InvalidKeeperQueue(String),
}

/// Payload rejections. These are protocol violations by a single sender and
/// never alter the replicated state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoundError {
    #[error("Duplicate payload from {sender} in round {round}")]
    DuplicateSender { round: String, sender: String },

    #[error("Unknown sender {sender} in round {round}")]
    UnknownSender { round: String, sender: String },

    #[error("Sender {sender} is not the keeper of round {round}")]
    NotKeeper { round: String, sender: String },

    #[error("Round {0} does not accept payloads")]
    RoundClosed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_messages_match_order_tooling() {
        let err = CodecError::InvalidDomainField("badField".to_string());
        assert_eq!(err.to_string(), "invalid typed-data domain key: 'badField'");

        let err = CodecError::InvalidUidLength { actual: 13 };
        assert_eq!(err.to_string(), "Invalid order UID length");

        let err = CodecError::UnknownEnumHash {
            kind: "kind",
            hash: "0xabcdef123456".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown kind: 0xabcdef123456");
    }

    #[test]
    fn test_only_configuration_errors_are_fatal() {
        let unreachable = WatchtowerError::UnreachableTransition {
            round: "select_orders".to_string(),
            event: "bad_submission".to_string(),
        };
        assert!(unreachable.is_fatal());

        let rejected: WatchtowerError = RoundError::RoundClosed("finished".to_string()).into();
        assert!(!rejected.is_fatal());

        let codec: WatchtowerError = CodecError::InvalidUidLength { actual: 0 }.into();
        assert!(!codec.is_fatal());
    }
}
