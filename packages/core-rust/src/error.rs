//! Typed error taxonomy with an explicit wrapped-cause chain.
//!
//! Recovery dispatch keys off [`ErrorKind`]; structured logging walks the
//! cause chain via [`AppError::error_chain`].

use std::borrow::Cow;
use std::fmt;

use serde::Serialize;

/// Classification used by the recovery engine to pick a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient infrastructure failure (e.g. database connectivity blip).
    Operational,
    /// Identity or session failure.
    Authentication,
    /// Malformed input.
    Validation,
    /// Anything else. Never recovered. Carries a type label for error chains.
    Unclassified(Cow<'static, str>),
}

impl ErrorKind {
    /// Returns the type name reported in error chains.
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::Operational => "OperationalError",
            Self::Authentication => "AuthenticationError",
            Self::Validation => "ValidationError",
            Self::Unclassified(label) => label,
        }
    }

    /// Returns `true` for the three kinds the recovery engine knows about.
    #[must_use]
    pub fn is_classified(&self) -> bool {
        !matches!(self, Self::Unclassified(_))
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Application error with a kind, a message and an optional wrapped cause.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct AppError {
    kind: ErrorKind,
    message: String,
    #[source]
    cause: Option<Box<AppError>>,
}

impl AppError {
    /// Creates an error of the given kind with no cause.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn operational(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Operational, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Creates an unclassified error labelled with `type_name`.
    pub fn unclassified(type_name: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unclassified(type_name.into()), message)
    }

    /// Wraps `cause` as the reason for this error, replacing any previous cause.
    #[must_use]
    pub fn caused_by(mut self, cause: AppError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    #[must_use]
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the directly wrapped cause, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    /// Iterates over this error followed by each cause down to the root.
    pub fn chain(&self) -> Chain<'_> {
        Chain { next: Some(self) }
    }

    /// Type names from this error through every cause, outermost first.
    #[must_use]
    pub fn error_chain(&self) -> Vec<String> {
        self.chain().map(|e| e.kind.type_name().to_string()).collect()
    }

    /// Returns the innermost cause (or `self` when there is none).
    #[must_use]
    pub fn root_cause(&self) -> &AppError {
        self.chain().last().unwrap_or(self)
    }
}

/// Iterator returned by [`AppError::chain`].
#[derive(Debug, Clone)]
pub struct Chain<'a> {
    next: Option<&'a AppError>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a AppError;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.cause();
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = AppError::operational("connection reset");
        assert_eq!(err.to_string(), "OperationalError: connection reset");
    }

    #[test]
    fn chain_walks_causes_outermost_first() {
        let err = AppError::validation("bad form").caused_by(
            AppError::operational("db down")
                .caused_by(AppError::unclassified("IoError", "broken pipe")),
        );

        assert_eq!(
            err.error_chain(),
            vec!["ValidationError", "OperationalError", "IoError"]
        );
        assert_eq!(err.root_cause().message(), "broken pipe");
    }

    #[test]
    fn single_error_chain_has_one_entry() {
        let err = AppError::authentication("expired");
        assert_eq!(err.error_chain(), vec!["AuthenticationError"]);
        assert!(err.cause().is_none());
        assert_eq!(err.root_cause().message(), "expired");
    }

    #[test]
    fn std_source_follows_wrapped_cause() {
        let err = AppError::operational("outer").caused_by(AppError::validation("inner"));
        let source = err.source().expect("source should be set");
        assert_eq!(source.to_string(), "ValidationError: inner");
    }

    #[test]
    fn unclassified_kinds_are_not_classified() {
        assert!(ErrorKind::Operational.is_classified());
        assert!(!ErrorKind::Unclassified("KeyError".into()).is_classified());
    }

    proptest! {
        #[test]
        fn chain_length_matches_nesting(depth in 0usize..16) {
            let mut err = AppError::unclassified("Root", "root");
            for i in 0..depth {
                err = AppError::operational(format!("layer {i}")).caused_by(err);
            }
            let chain = err.error_chain();
            prop_assert_eq!(chain.len(), depth + 1);
            prop_assert_eq!(chain.last().map(String::as_str), Some("Root"));
        }
    }
}
