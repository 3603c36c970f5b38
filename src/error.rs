use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    //
    // Invalid user input
    //
    #[error("Invalid reference to image: {0}")]
    InvalidReference(String),
    #[error("Invalid name for repository: {0}")]
    InvalidName(String),
    #[error("Invalid digest: {0}")]
    InvalidDigest(String),
    #[error(transparent)]
    InvalidUrl(#[from] url::ParseError),

    //
    // Unexpected response from registry
    //
    #[error("Expected exactly one WWW-Authenticate challenge, got {0}")]
    UnexpectedChallenges(usize),
    #[error("Unsupported WWW-Authenticate header: {0}")]
    UnsupportedAuthHeader(String),
    #[error("Bearer challenge lacks the realm parameter")]
    MissingRealm,
    #[error("Unexpected response from registry: {0}")]
    UnexpectedStatus(String),
    #[error("Token response carries neither `token` nor `access_token`")]
    InvalidTokenResponse,
    #[error("Location header is lacked in registry response")]
    MissingLocation,
    #[error(transparent)]
    InvalidJson(#[from] serde_json::error::Error),
    #[error("Response larger than {limit} bytes")]
    ResponseTooLarge { limit: u64 },

    //
    // Authentication failure
    //
    #[error("Authorization failed with {status}: {realm}")]
    AuthorizationFailed { status: u16, realm: url::Url },
    #[error("Authentication failed over every scheme: {0}")]
    AllSchemesFailed(SchemeErrors),

    //
    // Network and system error
    //
    #[error(transparent)]
    NetworkError(Box<ureq::Transport>),
    #[error(transparent)]
    UnknownIo(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<ureq::Transport> for Error {
    fn from(e: ureq::Transport) -> Self {
        Error::NetworkError(Box::new(e))
    }
}

/// Per-scheme errors gathered during the authentication handshake.
///
/// Registry misconfiguration often manifests differently over HTTPS and
/// HTTP, so every attempt's diagnostic is kept instead of only the last one.
#[derive(Debug)]
pub struct SchemeErrors(Vec<(&'static str, Error)>);

impl SchemeErrors {
    pub(crate) fn new() -> Self {
        SchemeErrors(Vec::new())
    }

    pub(crate) fn push(&mut self, scheme: &'static str, error: Error) {
        self.0.push((scheme, error));
    }

    pub fn errors(&self) -> impl Iterator<Item = &Error> {
        self.0.iter().map(|(_, e)| e)
    }
}

impl fmt::Display for SchemeErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (scheme, error)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", scheme, error)?;
        }
        Ok(())
    }
}
