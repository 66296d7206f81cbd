// Error taxonomy
//
// Contract violations (malformed replies, impossible coercions) are errors.
// Ordinary absence of data is not: a source that does not know an entity
// yields None / an unloaded entity, and an unwritable label cache is handled
// inside the resolver.

/// Every failure the core surfaces to its callers.
#[derive(Debug, thiserror::Error)]
pub enum RealityError {
    /// The paginated API reported an error; partial pages are discarded.
    #[error("remote API error ({code}): {info}")]
    Remote { code: String, info: String },

    /// A raw value cannot be converted to the requested type.
    #[error("cannot coerce {value} to {target}")]
    Uncoercible { value: String, target: String },

    /// A coercion target needs an option that was not supplied.
    #[error("coercion to {target} requires the `{option}` option")]
    MissingOption { option: String, target: String },

    /// A structured claim carried a value type tag we do not decode.
    #[error("unknown snak value type: {0}")]
    UnknownSnakType(String),

    #[error("incompatible units: {left} vs {right}")]
    IncompatibleUnits { left: String, right: String },

    /// `Variable::update` was given a variable with another name.
    #[error("cannot merge variable `{found}` into `{expected}`")]
    VariableMismatch { expected: String, found: String },

    /// Continuation requested on a response that is already complete.
    #[error("response has no continuation")]
    NoContinuation,

    #[error("malformed reply: {0}")]
    MalformedReply(String),

    #[error("invalid coordinate: {0}")]
    InvalidCoord(String),

    /// Decimal arithmetic left the representable range.
    #[error("arithmetic overflow: {0}")]
    Overflow(String),

    /// The injected HTTP collaborator failed.
    #[error("transport error: {0:#}")]
    Transport(#[from] anyhow::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RealityError {
    pub fn uncoercible(value: impl std::fmt::Debug, target: impl std::fmt::Display) -> Self {
        RealityError::Uncoercible {
            value: format!("{:?}", value),
            target: target.to_string(),
        }
    }

    /// True for failures raised while converting raw values.
    pub fn is_coercion(&self) -> bool {
        matches!(
            self,
            RealityError::Uncoercible { .. }
                | RealityError::MissingOption { .. }
                | RealityError::UnknownSnakType(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RealityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_message_carries_server_info() {
        let err = RealityError::Remote {
            code: "badtitle".to_string(),
            info: "Bad title \"\".".to_string(),
        };
        assert_eq!(err.to_string(), "remote API error (badtitle): Bad title \"\".");
    }

    #[test]
    fn test_uncoercible_names_value_and_target() {
        let err = RealityError::uncoercible("abc", "measure");
        let message = err.to_string();
        assert!(message.contains("\"abc\""));
        assert!(message.contains("measure"));
        assert!(err.is_coercion());
    }

    #[test]
    fn test_transport_wraps_anyhow() {
        let err: RealityError = anyhow::anyhow!("connection refused").into();
        assert!(matches!(err, RealityError::Transport(_)));
        assert!(!err.is_coercion());
    }
}
