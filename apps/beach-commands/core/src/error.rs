use std::fmt;

use serde::{Deserialize, Serialize};

/// General error condition, as carried by any stanza-level error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCondition {
    BadRequest,
    Forbidden,
    ItemNotFound,
    NotAllowed,
    InternalServerError,
    FeatureNotImplemented,
    ServiceUnavailable,
}

impl ErrorCondition {
    /// The error type a condition carries unless the raiser overrides it.
    pub fn default_type(self) -> ErrorType {
        match self {
            ErrorCondition::BadRequest => ErrorType::Modify,
            ErrorCondition::Forbidden => ErrorType::Auth,
            ErrorCondition::ItemNotFound
            | ErrorCondition::NotAllowed
            | ErrorCondition::InternalServerError
            | ErrorCondition::FeatureNotImplemented
            | ErrorCondition::ServiceUnavailable => ErrorType::Cancel,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCondition::BadRequest => "bad-request",
            ErrorCondition::Forbidden => "forbidden",
            ErrorCondition::ItemNotFound => "item-not-found",
            ErrorCondition::NotAllowed => "not-allowed",
            ErrorCondition::InternalServerError => "internal-server-error",
            ErrorCondition::FeatureNotImplemented => "feature-not-implemented",
            ErrorCondition::ServiceUnavailable => "service-unavailable",
        }
    }
}

impl fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    /// Do not retry; for command transitions this also aborts the session.
    Cancel,
    Continue,
    /// Retry after changing the request.
    Modify,
    Auth,
    Wait,
}

impl ErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::Cancel => "cancel",
            ErrorType::Continue => "continue",
            ErrorType::Modify => "modify",
            ErrorType::Auth => "auth",
            ErrorType::Wait => "wait",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command-specific refinement of a general condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpecificCondition {
    /// The action is recognised but not acceptable right now.
    BadAction,
    /// The action is not one the protocol defines.
    MalformedAction,
    BadLocale,
    /// The submitted payload is unacceptable, e.g. a required field is missing.
    BadPayload,
    /// No session with this id is known.
    BadSessionid,
    /// The session exists but has outlived its timeout.
    SessionExpired,
}

impl SpecificCondition {
    pub fn as_str(self) -> &'static str {
        match self {
            SpecificCondition::BadAction => "bad-action",
            SpecificCondition::MalformedAction => "malformed-action",
            SpecificCondition::BadLocale => "bad-locale",
            SpecificCondition::BadPayload => "bad-payload",
            SpecificCondition::BadSessionid => "bad-sessionid",
            SpecificCondition::SessionExpired => "session-expired",
        }
    }
}

impl fmt::Display for SpecificCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured protocol error carried back to the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandError {
    #[serde(rename = "type")]
    pub kind: ErrorType,
    pub condition: ErrorCondition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specific: Option<SpecificCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl CommandError {
    pub fn new(condition: ErrorCondition) -> Self {
        Self {
            kind: condition.default_type(),
            condition,
            specific: None,
            text: None,
        }
    }

    pub fn with_specific(mut self, specific: SpecificCondition) -> Self {
        self.specific = Some(specific);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_type(mut self, kind: ErrorType) -> Self {
        self.kind = kind;
        self
    }

    pub fn bad_request(specific: SpecificCondition) -> Self {
        Self::new(ErrorCondition::BadRequest).with_specific(specific)
    }

    pub fn bad_payload(text: impl Into<String>) -> Self {
        Self::bad_request(SpecificCondition::BadPayload).with_text(text)
    }

    pub fn internal(text: impl Into<String>) -> Self {
        Self::new(ErrorCondition::InternalServerError).with_text(text)
    }

    /// Whether a command raising this error gives up its session.
    pub fn is_cancellation(&self) -> bool {
        self.kind == ErrorType::Cancel
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.condition)?;
        if let Some(specific) = self.specific {
            write!(f, "/{specific}")?;
        }
        write!(f, " ({})", self.kind)?;
        if let Some(text) = &self.text {
            write!(f, ": {text}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CommandError {}
