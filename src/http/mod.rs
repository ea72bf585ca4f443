pub use self::error::{ParseRequestError, ParseRequestErrorKind};
pub use self::method::Method;
pub use self::request::{Request, Version, MAX_URI_LENGTH};
pub use self::response::{status_line, HeaderBlock, SERVER_NAME};
pub use self::status_code::StatusCode;

mod error;
mod method;
mod request;
mod response;
mod status_code;
