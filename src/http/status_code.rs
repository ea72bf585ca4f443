use std::fmt::{Display, Result as FmtResult};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum StatusCode {
    Ok = 200,
    BadRequest = 400,
    NotFound = 404,
    MethodNotAllowed = 405,
    UriTooLong = 414,
    InternalServerError = 500,
    HttpVersionNotSupported = 505,
}

impl StatusCode {
    pub fn code(&self) -> u16 {
        *self as u16
    }

    pub fn message(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::UriTooLong => "URI Too Long",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::HttpVersionNotSupported => "HTTP Version Not Supported",
        }
    }
}

/// Reason phrase for an arbitrary numeric status.
pub fn reason_phrase(code: u16) -> &'static str {
    match StatusCode::try_from(code) {
        Ok(status) => status.message(),
        Err(_) => "Unknown error of response status",
    }
}

impl TryFrom<u16> for StatusCode {
    type Error = u16;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        match code {
            200 => Ok(Self::Ok),
            400 => Ok(Self::BadRequest),
            404 => Ok(Self::NotFound),
            405 => Ok(Self::MethodNotAllowed),
            414 => Ok(Self::UriTooLong),
            500 => Ok(Self::InternalServerError),
            505 => Ok(Self::HttpVersionNotSupported),
            other => Err(other),
        }
    }
}

impl Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> FmtResult {
        write!(f, "{} {}", self.code(), self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_have_reason_phrases() {
        assert_eq!(reason_phrase(200), "OK");
        assert_eq!(reason_phrase(404), "Not Found");
        assert_eq!(reason_phrase(414), "URI Too Long");
        assert_eq!(reason_phrase(505), "HTTP Version Not Supported");
    }

    #[test]
    fn unknown_code_gets_generic_reason() {
        assert_eq!(reason_phrase(418), "Unknown error of response status");
        assert!(StatusCode::try_from(302).is_err());
    }

    #[test]
    fn display_renders_code_and_reason() {
        assert_eq!(StatusCode::MethodNotAllowed.to_string(), "405 Method Not Allowed");
    }
}
