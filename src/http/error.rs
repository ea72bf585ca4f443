use std::fmt::Display;

use thiserror::Error;

use super::{method::MethodError, StatusCode};

/// Every way a received request can fail to parse. Each kind carries its own
/// diagnostic text; all of them collapse into "answer with a status or drop".
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum ParseRequestErrorKind {
    #[error("request bytes are not valid UTF-8")]
    Encoding,
    #[error("request contains no request line")]
    Empty,
    #[error("request line is not `METHOD SP target [SP version]`")]
    MalformedRequestLine,
    #[error("request target exceeds the URI length limit")]
    UriTooLong,
    #[error("request target is not an absolute path")]
    InvalidTarget,
    #[error("request target contains an invalid percent-escape")]
    InvalidEscape,
    #[error("request target decodes to invalid UTF-8 or contains NUL")]
    InvalidPathEncoding,
    #[error("request target tries to leave the server root")]
    PathTraversal,
    #[error("protocol version token is not `HTTP/<major>.<minor>`")]
    MalformedVersion,
    #[error("protocol version is not supported")]
    UnsupportedVersion,
    #[error("method token is not recognised")]
    UnknownMethod,
    #[error("method is not allowed on this server")]
    MethodNotAllowed,
}

impl ParseRequestErrorKind {
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::UriTooLong => StatusCode::UriTooLong,
            Self::UnsupportedVersion => StatusCode::HttpVersionNotSupported,
            Self::UnknownMethod | Self::MethodNotAllowed => StatusCode::MethodNotAllowed,
            Self::Encoding
            | Self::Empty
            | Self::MalformedRequestLine
            | Self::InvalidTarget
            | Self::InvalidEscape
            | Self::InvalidPathEncoding
            | Self::PathTraversal
            | Self::MalformedVersion => StatusCode::BadRequest,
        }
    }
}

/// A rejected request: what went wrong plus whether the client speaks a
/// protocol variant that expects a status line back.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct ParseRequestError {
    kind: ParseRequestErrorKind,
    status_required: bool,
}

impl ParseRequestError {
    pub const fn new(kind: ParseRequestErrorKind, status_required: bool) -> Self {
        Self {
            kind,
            status_required,
        }
    }

    pub const fn kind(&self) -> ParseRequestErrorKind {
        self.kind
    }

    pub const fn status_required(&self) -> bool {
        self.status_required
    }

    pub const fn status_code(&self) -> StatusCode {
        self.kind.status_code()
    }
}

impl From<MethodError> for ParseRequestErrorKind {
    fn from(_: MethodError) -> Self {
        Self::UnknownMethod
    }
}

impl Display for ParseRequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Request parsing error: {}", self.kind)
    }
}

impl std::error::Error for ParseRequestError {}
