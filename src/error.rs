//! Error taxonomy for the bridge.
//!
//! Every failure that reaches a caller is a [`BridgeError`]: a `{kind, code, message}`
//! record whose [`ErrorCode`] string is part of the public contract. Use [`classify`]
//! to turn a raw failure source into a record.

use serde::Serialize;
use std::{fmt, io};
use thiserror::Error;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Broad family an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller input was rejected before any transport activity.
    InputValidation,
    /// Framing, size ceiling, or malformed traffic on the channel.
    Transport,
    /// The engine ran the operation and reported a failure.
    Engine,
    /// The channel or its owner went away before settlement.
    Context,
}

/// Stable machine-readable error codes.
///
/// The strings returned by [`ErrorCode::as_str`] must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    MsgNoKeys,
    MsgNotAFpr,
    MsgIncomplete,
    ParamWrong,
    GnupgError,
    PayloadTooLarge,
    FrameOutOfOrder,
    FrameIncomplete,
    ContextClosed,
    ConnTimeout,
    ConnUnexpectedAnswer,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 11] = [
        ErrorCode::MsgNoKeys,
        ErrorCode::MsgNotAFpr,
        ErrorCode::MsgIncomplete,
        ErrorCode::ParamWrong,
        ErrorCode::GnupgError,
        ErrorCode::PayloadTooLarge,
        ErrorCode::FrameOutOfOrder,
        ErrorCode::FrameIncomplete,
        ErrorCode::ContextClosed,
        ErrorCode::ConnTimeout,
        ErrorCode::ConnUnexpectedAnswer,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCode::MsgNoKeys => "MSG_NO_KEYS",
            ErrorCode::MsgNotAFpr => "MSG_NOT_A_FPR",
            ErrorCode::MsgIncomplete => "MSG_INCOMPLETE",
            ErrorCode::ParamWrong => "PARAM_WRONG",
            ErrorCode::GnupgError => "GNUPG_ERROR",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::FrameOutOfOrder => "FRAME_OUT_OF_ORDER",
            ErrorCode::FrameIncomplete => "FRAME_INCOMPLETE",
            ErrorCode::ContextClosed => "CONTEXT_CLOSED",
            ErrorCode::ConnTimeout => "CONN_TIMEOUT",
            ErrorCode::ConnUnexpectedAnswer => "CONN_UNEXPECTED_ANSWER",
        }
    }

    pub const fn kind(self) -> ErrorKind {
        match self {
            ErrorCode::MsgNoKeys
            | ErrorCode::MsgNotAFpr
            | ErrorCode::MsgIncomplete
            | ErrorCode::ParamWrong => ErrorKind::InputValidation,
            ErrorCode::GnupgError => ErrorKind::Engine,
            ErrorCode::PayloadTooLarge
            | ErrorCode::FrameOutOfOrder
            | ErrorCode::FrameIncomplete
            | ErrorCode::ConnTimeout
            | ErrorCode::ConnUnexpectedAnswer => ErrorKind::Transport,
            ErrorCode::ContextClosed => ErrorKind::Context,
        }
    }

    /// Human-readable default text, used when no detail is available.
    pub const fn summary(self) -> &'static str {
        match self {
            ErrorCode::MsgNoKeys => "no valid keys were provided",
            ErrorCode::MsgNotAFpr => "the input is not a valid fingerprint",
            ErrorCode::MsgIncomplete => "the request is missing required parameters",
            ErrorCode::ParamWrong => "invalid parameter type",
            ErrorCode::GnupgError => "the engine reported an error",
            ErrorCode::PayloadTooLarge => "the payload exceeds the transport ceiling",
            ErrorCode::FrameOutOfOrder => "a frame arrived out of sequence",
            ErrorCode::FrameIncomplete => "not all frames of the message arrived",
            ErrorCode::ContextClosed => "the channel was closed before the request settled",
            ErrorCode::ConnTimeout => "the engine did not answer in time",
            ErrorCode::ConnUnexpectedAnswer => "the engine sent an unexpected answer",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// The rejection value of every bridge operation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{code}: {message}")]
pub struct BridgeError {
    kind: ErrorKind,
    code: ErrorCode,
    message: String,
}

impl BridgeError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            kind: code.kind(),
            code,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<ErrorCode> for BridgeError {
    fn from(code: ErrorCode) -> Self {
        BridgeError::new(code, code.summary())
    }
}

/// Caller input problems detected by the normalizer or the precondition checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFault {
    NoKeys,
    NotAFingerprint,
    Missing,
    WrongShape,
}

/// Problems splitting or reassembling a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingFault {
    TooLarge,
    Sequence,
    Incomplete,
}

/// Where a failure came from.
#[derive(Debug)]
pub enum FailureSource<'a> {
    Input(InputFault),
    Framing(FramingFault),
    /// The port failed to move bytes.
    Transport(&'a io::Error),
    /// The engine answered with an error envelope; `code` is its numeric error, if any.
    Engine { code: Option<i64> },
    /// The engine answered, but not in a shape we understand.
    Malformed,
    Timeout,
    Closed,
}

/// Map a failure source plus free-form detail into an error record.
///
/// An empty `detail` falls back to the code's [`ErrorCode::summary`].
pub fn classify(source: FailureSource<'_>, detail: &str) -> BridgeError {
    let code = match &source {
        FailureSource::Input(InputFault::NoKeys) => ErrorCode::MsgNoKeys,
        FailureSource::Input(InputFault::NotAFingerprint) => ErrorCode::MsgNotAFpr,
        FailureSource::Input(InputFault::Missing) => ErrorCode::MsgIncomplete,
        FailureSource::Input(InputFault::WrongShape) => ErrorCode::ParamWrong,
        FailureSource::Framing(FramingFault::TooLarge) => ErrorCode::PayloadTooLarge,
        FailureSource::Framing(FramingFault::Sequence) => ErrorCode::FrameOutOfOrder,
        FailureSource::Framing(FramingFault::Incomplete) => ErrorCode::FrameIncomplete,
        FailureSource::Transport(err) => match err.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected => ErrorCode::ContextClosed,
            io::ErrorKind::InvalidInput => ErrorCode::PayloadTooLarge,
            io::ErrorKind::TimedOut => ErrorCode::ConnTimeout,
            _ => ErrorCode::ConnUnexpectedAnswer,
        },
        FailureSource::Engine { .. } => ErrorCode::GnupgError,
        FailureSource::Malformed => ErrorCode::ConnUnexpectedAnswer,
        FailureSource::Timeout => ErrorCode::ConnTimeout,
        FailureSource::Closed => ErrorCode::ContextClosed,
    };

    let mut message = if detail.is_empty() {
        code.summary().to_string()
    } else {
        detail.to_string()
    };
    match source {
        FailureSource::Engine { code: Some(n) } => message.push_str(&format!(" (engine code {n})")),
        FailureSource::Transport(err) if detail.is_empty() => message = err.to_string(),
        _ => {}
    }
    BridgeError::new(code, message)
}
