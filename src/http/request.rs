use std::path::{Path, PathBuf};

use nom::{
    bytes::complete::{tag, take_till1, take_while1},
    character::complete::{char, digit1},
    combinator::{all_consuming, map_res, opt},
    sequence::{preceded, separated_pair},
    IResult,
};

use super::{method::Method, ParseRequestError, ParseRequestErrorKind, StatusCode};

/// Longest request target accepted before answering 414.
pub const MAX_URI_LENGTH: usize = 2048;

/// File served when the target names a directory.
pub const INDEX_FILE: &str = "index.html";

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Version {
    /// `GET /path` with no version token: no status line, no headers.
    Http09,
    Http10,
    Http11,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Request {
    method: Method,
    path: String,
    version: Version,
}

/// Borrowed tokens of the first line, before any validation.
#[derive(Debug)]
struct RequestLine<'a> {
    method: &'a str,
    target: &'a str,
    version: Option<&'a str>,
}

impl Request {
    /// Parses the raw bytes of one receive call.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseRequestError> {
        let request_str = std::str::from_utf8(bytes).map_err(|_| {
            ParseRequestError::new(ParseRequestErrorKind::Encoding, has_version_token(bytes))
        })?;
        Self::try_from(request_str)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Percent-decoded path, query stripped.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::Ok
    }

    pub fn status_required(&self) -> bool {
        self.version != Version::Http09
    }

    /// URL path actually served, with directory targets pointing at their index file.
    pub fn location(&self) -> String {
        if self.path.ends_with('/') {
            format!("{}{}", self.path, INDEX_FILE)
        } else {
            self.path.clone()
        }
    }

    /// Joins the served location onto `root`. The path has already been checked
    /// for `..` segments, so the result stays under `root`.
    pub fn resolve(&self, root: &Path) -> PathBuf {
        root.join(self.location().trim_start_matches('/'))
    }
}

impl TryFrom<&str> for Request {
    type Error = ParseRequestError;

    fn try_from(request_str: &str) -> Result<Self, Self::Error> {
        let first_line = request_str
            .lines()
            .next()
            .filter(|line| !line.is_empty())
            .ok_or(ParseRequestError::new(ParseRequestErrorKind::Empty, true))?;

        let (_, line) = all_consuming(request_line)(first_line).map_err(|_| {
            ParseRequestError::new(ParseRequestErrorKind::MalformedRequestLine, true)
        })?;

        let status_required = line.version.is_some();
        let fail = |kind| ParseRequestError::new(kind, status_required);

        if line.target.len() > MAX_URI_LENGTH {
            return Err(fail(ParseRequestErrorKind::UriTooLong));
        }

        let version = match line.version {
            None => Version::Http09,
            Some(token) => match all_consuming(http_version)(token) {
                Ok((_, (1, 0))) => Version::Http10,
                Ok((_, (1, 1))) => Version::Http11,
                Ok(_) => return Err(fail(ParseRequestErrorKind::UnsupportedVersion)),
                Err(_) => return Err(fail(ParseRequestErrorKind::MalformedVersion)),
            },
        };

        let method = line
            .method
            .parse::<Method>()
            .map_err(|e| fail(e.into()))?;
        if !method.is_allowed() {
            return Err(fail(ParseRequestErrorKind::MethodNotAllowed));
        }

        let path = decode_target(line.target).map_err(fail)?;

        Ok(Self {
            method,
            path,
            version,
        })
    }
}

fn request_line(input: &str) -> IResult<&str, RequestLine<'_>> {
    let (input, method) = take_while1(is_token_char)(input)?;
    let (input, target) = preceded(char(' '), take_till1(|c: char| c == ' '))(input)?;
    let (input, version) = opt(preceded(char(' '), take_till1(|c: char| c == ' ')))(input)?;

    Ok((
        input,
        RequestLine {
            method,
            target,
            version,
        },
    ))
}

fn http_version(input: &str) -> IResult<&str, (u32, u32)> {
    preceded(
        tag("HTTP/"),
        separated_pair(
            map_res(digit1, str::parse::<u32>),
            char('.'),
            map_res(digit1, str::parse::<u32>),
        ),
    )(input)
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c)
}

/// Whether the first line carries a third token, which makes it a full
/// request that expects a status line even when it cannot be decoded.
fn has_version_token(bytes: &[u8]) -> bool {
    let line = bytes.split(|&b| b == b'\n').next().unwrap_or(bytes);
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    line.split(|&b| b == b' ').filter(|token| !token.is_empty()).count() >= 3
}

fn decode_target(target: &str) -> Result<String, ParseRequestErrorKind> {
    if !target.starts_with('/') {
        return Err(ParseRequestErrorKind::InvalidTarget);
    }

    let raw_path = target.split_once('?').map_or(target, |(path, _)| path);
    if !has_valid_escapes(raw_path) {
        return Err(ParseRequestErrorKind::InvalidEscape);
    }

    let path = urlencoding::decode(raw_path)
        .map_err(|_| ParseRequestErrorKind::InvalidPathEncoding)?
        .into_owned();

    if path.contains('\0') {
        return Err(ParseRequestErrorKind::InvalidPathEncoding);
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(ParseRequestErrorKind::PathTraversal);
    }

    Ok(path)
}

/// Every `%` must start a two-digit hex escape. The decoder passes malformed
/// escapes through verbatim, so they are rejected up front.
fn has_valid_escapes(raw_path: &str) -> bool {
    raw_path.split('%').skip(1).all(|escaped| {
        escaped
            .as_bytes()
            .get(..2)
            .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit))
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn status_of(raw: &str) -> u16 {
        match Request::try_from(raw) {
            Ok(request) => request.status().code(),
            Err(e) => e.status_code().code(),
        }
    }

    #[test]
    fn parses_http10_get() {
        let request = Request::try_from("GET /index.html HTTP/1.0\r\n\r\n").unwrap();

        assert_eq!(request.method(), &Method::Get);
        assert_eq!(request.path(), "/index.html");
        assert_eq!(request.version(), Version::Http10);
        assert!(request.status_required());
    }

    #[test]
    fn simple_request_needs_no_status_line() {
        let request = Request::try_from("GET /index.html\r\n").unwrap();

        assert_eq!(request.version(), Version::Http09);
        assert!(!request.status_required());
    }

    #[test]
    fn maps_failures_to_status_codes() {
        let long_uri = format!("GET /{} HTTP/1.0\r\n", "a".repeat(MAX_URI_LENGTH));

        assert_eq!(status_of("GET /index.html HTTP/1.1\r\n"), 200);
        assert_eq!(status_of("POST /index.html HTTP/1.0\r\n"), 405);
        assert_eq!(status_of("BREW /pot HTTP/1.0\r\n"), 405);
        assert_eq!(status_of("GET  /index.html HTTP/1.0\r\n"), 400);
        assert_eq!(status_of("GET\r\n"), 400);
        assert_eq!(status_of("\r\n"), 400);
        assert_eq!(status_of(&long_uri), 414);
        assert_eq!(status_of("GET /index.html HTTP/2.0\r\n"), 505);
        assert_eq!(status_of("GET /index.html HTTQ/1.0\r\n"), 400);
    }

    #[test]
    fn error_kinds_stay_distinct() {
        let kind = |raw: &str| Request::try_from(raw).unwrap_err().kind();

        assert_eq!(kind("GET /a%zz HTTP/1.0"), ParseRequestErrorKind::InvalidEscape);
        assert_eq!(kind("GET /a%2 HTTP/1.0"), ParseRequestErrorKind::InvalidEscape);
        assert_eq!(kind("GET /a%00 HTTP/1.0"), ParseRequestErrorKind::InvalidPathEncoding);
        assert_eq!(kind("GET /a%ff HTTP/1.0"), ParseRequestErrorKind::InvalidPathEncoding);
        assert_eq!(kind("GET /../etc/passwd HTTP/1.0"), ParseRequestErrorKind::PathTraversal);
        assert_eq!(kind("GET /%2e%2e/x HTTP/1.0"), ParseRequestErrorKind::PathTraversal);
        assert_eq!(kind("GET index.html HTTP/1.0"), ParseRequestErrorKind::InvalidTarget);
        assert_eq!(kind("GET / HTTP/1"), ParseRequestErrorKind::MalformedVersion);
        assert_eq!(kind("get / HTTP/1.0"), ParseRequestErrorKind::UnknownMethod);
    }

    #[test]
    fn simple_request_errors_are_silent() {
        let error = Request::try_from("POST /index.html\r\n").unwrap_err();

        assert_eq!(error.kind(), ParseRequestErrorKind::MethodNotAllowed);
        assert!(!error.status_required());
    }

    #[test]
    fn invalid_utf8_is_bad_request() {
        let error = Request::parse(b"GET /\xff\xfe HTTP/1.0\r\n").unwrap_err();

        assert_eq!(error.kind(), ParseRequestErrorKind::Encoding);
        assert_eq!(error.status_code(), StatusCode::BadRequest);
        assert!(error.status_required());
    }

    #[test]
    fn invalid_utf8_simple_request_stays_silent() {
        let error = Request::parse(b"GET /\xff\xfe\r\n").unwrap_err();

        assert_eq!(error.kind(), ParseRequestErrorKind::Encoding);
        assert!(!error.status_required());

        let error = Request::parse(b"GET  /\xff\r\n").unwrap_err();
        assert!(!error.status_required());
    }

    #[test]
    fn escapes_must_be_two_hex_digits() {
        assert!(has_valid_escapes("/plain/path"));
        assert!(has_valid_escapes("/a%20b%2Fc"));
        assert!(has_valid_escapes("/100%25"));
        assert!(!has_valid_escapes("/a%"));
        assert!(!has_valid_escapes("/a%4"));
        assert!(!has_valid_escapes("/a%g1"));
        assert!(!has_valid_escapes("/a%%41"));
    }

    #[test]
    fn decodes_escapes_and_strips_query() {
        let request = Request::try_from("GET /my%20file.txt?v=2 HTTP/1.0\r\n").unwrap();
        assert_eq!(request.path(), "/my file.txt");

        let request = Request::try_from("GET /caf%C3%A9+menu.txt HTTP/1.0\r\n").unwrap();
        assert_eq!(request.path(), "/café+menu.txt");
    }

    #[test]
    fn resolves_directories_to_index() {
        let root = Path::new("/srv/www");
        let request = Request::try_from("GET / HTTP/1.0\r\n").unwrap();
        assert_eq!(request.location(), "/index.html");
        assert_eq!(request.resolve(root), PathBuf::from("/srv/www/index.html"));

        let request = Request::try_from("GET /docs/guide.txt HTTP/1.0\r\n").unwrap();
        assert_eq!(request.resolve(root), PathBuf::from("/srv/www/docs/guide.txt"));
    }
}
