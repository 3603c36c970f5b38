use crate::error::*;
use serde::Deserialize;
use std::collections::HashMap;
use url::Url;

/// Source of credentials used during the authentication handshake.
///
/// Basic pairs are attached to token requests and to requests against
/// registries that only answer `Basic` challenges. Refresh tokens are kept
/// per token service and live only for the process lifetime.
pub trait CredentialStore {
    /// Username and password for the given token endpoint, if any.
    fn basic(&self, realm: &Url) -> Option<(String, String)>;

    /// Refresh token previously issued for `service`, if any.
    fn refresh_token(&self, realm: &Url, service: &str) -> Option<String>;

    /// Remember a refresh token issued for `service`.
    fn set_refresh_token(&mut self, realm: &Url, service: &str, token: String);
}

/// No credentials; token requests are sent anonymously.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl CredentialStore for Anonymous {
    fn basic(&self, _realm: &Url) -> Option<(String, String)> {
        None
    }

    fn refresh_token(&self, _realm: &Url, _service: &str) -> Option<String> {
        None
    }

    fn set_refresh_token(&mut self, _realm: &Url, _service: &str, _token: String) {}
}

/// Fixed username/password pair supplied by the caller.
#[derive(Debug, Clone)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl CredentialStore for BasicCredentials {
    fn basic(&self, _realm: &Url) -> Option<(String, String)> {
        Some((self.username.clone(), self.password.clone()))
    }

    fn refresh_token(&self, _realm: &Url, _service: &str) -> Option<String> {
        None
    }

    fn set_refresh_token(&mut self, _realm: &Url, _service: &str, _token: String) {}
}

/// Credentials backed by per-service OAuth refresh tokens.
#[derive(Debug, Clone, Default)]
pub struct RefreshTokenCredentials {
    pub username: String,
    tokens: HashMap<String, String>,
}

impl RefreshTokenCredentials {
    pub fn new(username: &str) -> Self {
        RefreshTokenCredentials {
            username: username.to_string(),
            tokens: HashMap::new(),
        }
    }
}

impl CredentialStore for RefreshTokenCredentials {
    fn basic(&self, _realm: &Url) -> Option<(String, String)> {
        None
    }

    fn refresh_token(&self, _realm: &Url, service: &str) -> Option<String> {
        self.tokens.get(service).cloned()
    }

    fn set_refresh_token(&mut self, _realm: &Url, service: &str, token: String) {
        self.tokens.insert(service.to_string(), token);
    }
}

/// One `WWW-Authenticate` challenge
///
/// ```
/// use skiff::distribution::AuthChallenge;
///
/// let challenge = AuthChallenge::from_header(
///     r#"Bearer realm="https://auth.example/token",service="registry.example""#,
/// ).unwrap();
///
/// assert_eq!(challenge.scheme, "bearer");
/// assert_eq!(challenge.params["realm"], "https://auth.example/token");
/// assert_eq!(challenge.service(), Some("registry.example"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    /// Scheme token, lowercased (`bearer`, `basic`, ...)
    pub scheme: String,
    pub params: HashMap<String, String>,
}

impl AuthChallenge {
    /// Select the challenge from a `/v2/` probe response.
    ///
    /// The registry must present exactly one challenge; guessing among
    /// several schemes is refused.
    pub fn from_headers(headers: &[&str]) -> Result<Self> {
        if headers.len() != 1 {
            return Err(Error::UnexpectedChallenges(headers.len()));
        }
        Self::from_header(headers[0])
    }

    pub fn from_header(header: &str) -> Result<Self> {
        let err = || Error::UnsupportedAuthHeader(header.to_string());
        let (scheme, rest) = match header.split_once(' ') {
            Some((scheme, rest)) => (scheme, rest),
            None => (header, ""),
        };
        if scheme.is_empty() {
            return Err(err());
        }

        let mut params = HashMap::new();
        for param in split_params(rest) {
            let param = param.trim();
            if param.is_empty() {
                continue;
            }
            let (key, value) = param.split_once('=').ok_or_else(err)?;
            params.insert(
                key.trim().to_lowercase(),
                value.trim().trim_matches('"').to_string(),
            );
        }
        Ok(AuthChallenge {
            scheme: scheme.to_lowercase(),
            params,
        })
    }

    pub fn is_bearer(&self) -> bool {
        self.scheme == "bearer"
    }

    /// Token endpoint named by the challenge. Mandatory for bearer.
    pub fn realm(&self) -> Result<Url> {
        let realm = self.params.get("realm").ok_or(Error::MissingRealm)?;
        Ok(Url::parse(realm)?)
    }

    pub fn service(&self) -> Option<&str> {
        self.params.get("service").map(|s| s.as_str())
    }
}

/// Split challenge parameters on commas outside of quoted values.
///
/// Scope parameters may carry commas, e.g. `scope="repository:foo:pull,push"`.
fn split_params(input: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                params.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    params.push(&input[start..]);
    params
}

/// Bearer token obtained from a token endpoint
///
/// Expiry is advisory only; the token is re-exchanged when a request
/// receives a fresh 401, never proactively.
#[derive(Debug, Clone)]
pub struct BearerToken {
    pub token: String,
    pub expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
}

/// Exchange credentials for a bearer token against the challenge's realm.
///
/// ```text
/// GET <realm>?service=<service>&scope=<scope1>&scope=<scope2>
/// ```
///
/// Registries disagree on the name of the token field, so both `token` and
/// `access_token` are accepted.
pub fn fetch_token(
    agent: &ureq::Agent,
    challenge: &AuthChallenge,
    creds: &mut dyn CredentialStore,
    scopes: &[String],
) -> Result<BearerToken> {
    let realm = challenge.realm()?;

    let mut req = agent
        .get(realm.as_str())
        .set("Accept", "application/json");
    if let Some((username, password)) = creds.basic(&realm) {
        let octet = base64::encode(format!("{}:{}", username, password));
        req = req.set("Authorization", &format!("Basic {}", octet));
    }
    if let Some(service) = challenge.service() {
        req = req.query("service", service);
        if let Some(token) = creds.refresh_token(&realm, service) {
            req = req
                .query("grant_type", "refresh_token")
                .query("refresh_token", &token);
        }
    }
    for scope in scopes {
        req = req.query("scope", scope);
    }

    log::debug!("Requesting token from {}", realm);
    // ureq only errors on 4xx/5xx; anything but a plain 200 is refused here.
    let res = match req.call() {
        Ok(res) if res.status() == 200 => res,
        Ok(res) => {
            return Err(Error::AuthorizationFailed {
                status: res.status(),
                realm,
            });
        }
        Err(ureq::Error::Status(status, _)) => {
            return Err(Error::AuthorizationFailed { status, realm });
        }
        Err(ureq::Error::Transport(e)) => return Err(e.into()),
    };

    let body: TokenResponse = serde_json::from_str(&res.into_string()?)?;
    if let (Some(service), Some(token)) = (challenge.service(), body.refresh_token) {
        creds.set_refresh_token(&realm, service, token);
    }
    let token = body
        .token
        .or(body.access_token)
        .ok_or(Error::InvalidTokenResponse)?;
    Ok(BearerToken {
        token,
        expires_in: body.expires_in,
    })
}
