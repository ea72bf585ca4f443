use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

/// Standard request methods. Only `Get` is served; the others are recognised
/// so that a well-formed request for them is answered with 405.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Patch,
    Options,
    Connect,
    Trace,
}

impl Method {
    const ALL: [Self; 9] = [
        Self::Get,
        Self::Head,
        Self::Post,
        Self::Put,
        Self::Delete,
        Self::Patch,
        Self::Options,
        Self::Connect,
        Self::Trace,
    ];

    /// Token as it appears on the request line. Method names are case-sensitive.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Options => "OPTIONS",
            Self::Connect => "CONNECT",
            Self::Trace => "TRACE",
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Get)
    }
}

impl FromStr for Method {
    type Err = MethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|method| method.as_str() == s)
            .ok_or(MethodError)
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The token is syntactically a method but not one we know.
#[derive(Debug)]
pub struct MethodError;

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_standard_tokens() {
        assert_eq!("GET".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("DELETE".parse::<Method>().unwrap(), Method::Delete);
        assert_eq!(Method::Options.to_string(), "OPTIONS");
    }

    #[test]
    fn only_get_is_allowed() {
        let allowed: Vec<Method> = Method::ALL.into_iter().filter(Method::is_allowed).collect();
        assert_eq!(allowed, vec![Method::Get]);
    }

    #[test]
    fn unknown_and_lowercase_tokens_are_rejected() {
        assert!("BREW".parse::<Method>().is_err());
        assert!("get".parse::<Method>().is_err());
    }
}
