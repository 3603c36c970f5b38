use crate::{
    distribution::{auth::*, tags},
    error::*,
    Digest, ImageReference,
};
use std::{fmt, time::Duration};
use url::Url;

pub const MEDIA_TYPE_SCHEMA1: &str = "application/vnd.docker.distribution.manifest.v1+json";
pub const MEDIA_TYPE_SCHEMA2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_TYPE_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// URL scheme used for every request on a client.
///
/// Selected once during authentication, then fixed for the client's
/// lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Https,
    Http,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Https => "https",
            Scheme::Http => "http",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build a registry URL for the given host.
///
/// `docker.io` is rewritten to `index.docker.io`, the historical API host of
/// Docker Hub. Every other host is passed through unchanged.
pub fn registry_url(scheme: Scheme, host: &str, path: &str) -> Result<Url> {
    let host = if host == "docker.io" {
        "index.docker.io"
    } else {
        host
    };
    Ok(Url::parse(&format!("{}://{}{}", scheme, host, path))?)
}

/// Authorization attached to outgoing requests, installed by the handshake.
enum Authorizer {
    Anonymous,
    Basic {
        header: String,
    },
    Bearer {
        token: BearerToken,
        challenge: AuthChallenge,
        scopes: Vec<String>,
    },
}

/// Accept headers sent with manifest requests.
#[derive(Debug, Clone, Default)]
pub struct GetManifestOptions {
    /// All known manifest types. As new types may be added in the future,
    /// this does not guarantee backward compatibility.
    pub accept_known: bool,
    pub accept_schema1: bool,
    pub accept_schema2: bool,
    pub accept_manifest_list: bool,
    pub accept_oci_schema: bool,
    pub accept_oci_index: bool,
    /// Custom media types to accept.
    pub media_types: Vec<String>,
}

impl GetManifestOptions {
    fn accept(&self) -> String {
        let mut types = Vec::new();
        if self.accept_known || self.accept_schema1 {
            types.push(MEDIA_TYPE_SCHEMA1);
        }
        if self.accept_known || self.accept_schema2 {
            types.push(MEDIA_TYPE_SCHEMA2);
        }
        if self.accept_known || self.accept_manifest_list {
            types.push(MEDIA_TYPE_MANIFEST_LIST);
        }
        if self.accept_known || self.accept_oci_schema {
            types.push(MEDIA_TYPE_OCI_MANIFEST);
        }
        if self.accept_known || self.accept_oci_index {
            types.push(MEDIA_TYPE_OCI_INDEX);
        }
        for media_type in &self.media_types {
            types.push(media_type);
        }
        types.join(", ")
    }
}

/// A client for the `/v2/` API of one repository
///
/// The client must be authenticated exactly once before issuing requests;
/// [`Client::authenticate`] selects the connection scheme and installs the
/// authorization used by every subsequent request.
pub struct Client {
    agent: ureq::Agent,
    reference: ImageReference,
    insecure: bool,
    scheme: Scheme,
    creds: Box<dyn CredentialStore>,
    auth: Authorizer,
}

impl Client {
    pub fn new(reference: ImageReference, insecure: bool) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(30))
            .build();
        Client {
            agent,
            reference,
            insecure,
            scheme: Scheme::Https,
            creds: Box::new(Anonymous),
            auth: Authorizer::Anonymous,
        }
    }

    pub fn reference(&self) -> &ImageReference {
        &self.reference
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Registry URL for the given path on this client's host and scheme.
    pub fn url(&self, path: &str) -> Result<Url> {
        registry_url(self.scheme, &self.reference.host, path)
    }

    /// Negotiate authentication with the registry.
    ///
    /// HTTPS is tried unconditionally; when the client allows insecure
    /// fallback, the whole handshake is retried over HTTP. If every scheme
    /// fails, the errors of all attempts are surfaced together.
    pub fn authenticate(
        &mut self,
        creds: Box<dyn CredentialStore>,
        actions: &[&str],
    ) -> Result<()> {
        self.creds = creds;
        let scopes = vec![format!(
            "repository:{}:{}",
            self.reference.scope_path(),
            actions.join(",")
        )];

        let mut schemes = vec![Scheme::Https];
        if self.insecure {
            schemes.push(Scheme::Http);
        }

        let mut errors = SchemeErrors::new();
        for scheme in schemes {
            self.scheme = scheme;
            match self.handshake(&scopes) {
                Ok(auth) => {
                    self.auth = auth;
                    return Ok(());
                }
                Err(e) => {
                    log::debug!("Authentication over {} failed: {}", scheme, e);
                    errors.push(scheme.as_str(), e);
                }
            }
        }
        Err(Error::AllSchemesFailed(errors))
    }

    /// Probe `/v2/` on the current scheme and build the matching authorizer.
    fn handshake(&mut self, scopes: &[String]) -> Result<Authorizer> {
        let url = self.url("/v2/")?;
        log::info!("GET {}", url);
        match self.agent.get(url.as_str()).call() {
            // Registry answers without a challenge; no authentication needed.
            Ok(_) => Ok(Authorizer::Anonymous),
            Err(ureq::Error::Status(401, res)) => {
                let headers = res.all("www-authenticate");
                let challenge = AuthChallenge::from_headers(&headers)?;
                if challenge.is_bearer() {
                    let token =
                        fetch_token(&self.agent, &challenge, self.creds.as_mut(), scopes)?;
                    Ok(Authorizer::Bearer {
                        token,
                        challenge,
                        scopes: scopes.to_vec(),
                    })
                } else {
                    // Any non-bearer scheme means the provided credentials
                    // are attached directly, without a token exchange.
                    match self.creds.basic(&url) {
                        Some((username, password)) => {
                            let octet = base64::encode(format!("{}:{}", username, password));
                            Ok(Authorizer::Basic {
                                header: format!("Basic {}", octet),
                            })
                        }
                        None => Err(Error::AuthorizationFailed {
                            status: 401,
                            realm: url,
                        }),
                    }
                }
            }
            Err(ureq::Error::Status(_, res)) => Err(Error::UnexpectedStatus(status_line(&res))),
            Err(ureq::Error::Transport(e)) => Err(e.into()),
        }
    }

    /// Execute a request with the installed authorization.
    ///
    /// The response is returned for any HTTP status; interpreting it belongs
    /// to the caller, which must also drop the response on every path to
    /// release the connection. The exception is a 401 under a bearer
    /// authorizer: the token is exchanged again, once, and the request
    /// retried before the response is surfaced.
    pub fn call(&mut self, req: ureq::Request) -> Result<ureq::Response> {
        self.dispatch(req, None)
    }

    /// Like [`Client::call`], with a request body.
    pub fn send_bytes(&mut self, req: ureq::Request, body: &[u8]) -> Result<ureq::Response> {
        self.dispatch(req, Some(body))
    }

    fn dispatch(&mut self, req: ureq::Request, body: Option<&[u8]>) -> Result<ureq::Response> {
        match exec(self.authorize(req.clone()), body) {
            Err(ureq::Error::Status(401, _))
                if matches!(self.auth, Authorizer::Bearer { .. }) =>
            {
                log::debug!("Token rejected, re-authorizing");
                self.refresh_token()?;
                flatten(exec(self.authorize(req), body))
            }
            result => flatten(result),
        }
    }

    fn authorize(&self, req: ureq::Request) -> ureq::Request {
        match &self.auth {
            Authorizer::Anonymous => req,
            Authorizer::Basic { header } => req.set("Authorization", header),
            Authorizer::Bearer { token, .. } => {
                req.set("Authorization", &format!("Bearer {}", token.token))
            }
        }
    }

    fn refresh_token(&mut self) -> Result<()> {
        if let Authorizer::Bearer {
            token,
            challenge,
            scopes,
        } = &mut self.auth
        {
            *token = fetch_token(&self.agent, challenge, self.creds.as_mut(), scopes)?;
        }
        Ok(())
    }

    pub(crate) fn get(&self, url: &Url) -> ureq::Request {
        log::info!("GET {}", url);
        self.agent.get(url.as_str())
    }

    fn put(&self, url: &Url) -> ureq::Request {
        log::info!("PUT {}", url);
        self.agent.put(url.as_str())
    }

    fn post(&self, url: &Url) -> ureq::Request {
        log::info!("POST {}", url);
        self.agent.post(url.as_str())
    }

    fn delete(&self, url: &Url) -> ureq::Request {
        log::info!("DELETE {}", url);
        self.agent.delete(url.as_str())
    }

    /// Get a manifest as it came from the registry.
    ///
    /// ```text
    /// GET /v2/<name>/manifests/<reference>
    /// ```
    pub fn get_manifest(
        &mut self,
        reference: &str,
        opts: &GetManifestOptions,
    ) -> Result<ureq::Response> {
        let url = self
            .url(&format!("/v2/{}/manifests/{}", self.reference.name, reference))?;
        let mut req = self.get(&url);
        let accept = opts.accept();
        if !accept.is_empty() {
            req = req.set("Accept", &accept);
        }
        self.call(req)
    }

    /// Put a manifest with the given media type.
    ///
    /// ```text
    /// PUT /v2/<name>/manifests/<reference>
    /// ```
    ///
    /// Returns the digest confirmed by the registry.
    pub fn put_manifest(
        &mut self,
        reference: &str,
        media_type: &str,
        manifest: &[u8],
    ) -> Result<String> {
        let url = self
            .url(&format!("/v2/{}/manifests/{}", self.reference.name, reference))?;
        let req = self.put(&url).set("Content-Type", media_type);
        let res = self.send_bytes(req, manifest)?;
        if res.status() != 201 {
            return Err(Error::UnexpectedStatus(status_line(&res)));
        }
        Ok(res
            .header("Docker-Content-Digest")
            .unwrap_or_default()
            .to_string())
    }

    /// Delete a manifest.
    ///
    /// ```text
    /// DELETE /v2/<name>/manifests/<reference>
    /// ```
    pub fn delete_manifest(&mut self, reference: &str) -> Result<ureq::Response> {
        let url = self
            .url(&format!("/v2/{}/manifests/{}", self.reference.name, reference))?;
        let req = self.delete(&url);
        self.call(req)
    }

    /// Get a blob for the given digest.
    ///
    /// ```text
    /// GET /v2/<name>/blobs/<digest>
    /// ```
    pub fn get_blob(&mut self, digest: &Digest) -> Result<ureq::Response> {
        let url = self
            .url(&format!("/v2/{}/blobs/{}", self.reference.name, digest))?;
        let req = self.get(&url);
        self.call(req)
    }

    /// Put a blob.
    ///
    /// ```text
    /// POST /v2/<name>/blobs/uploads/
    /// ```
    ///
    /// followed by a PUT to the upload URL named by the `Location` header.
    pub fn put_blob(&mut self, blob: &[u8], digest: Option<Digest>) -> Result<Digest> {
        let digest = digest.unwrap_or_else(|| Digest::from_buf_sha256(blob));

        let url = self
            .url(&format!("/v2/{}/blobs/uploads/", self.reference.name))?;
        let req = self.post(&url);
        let res = self.call(req)?;
        if res.status() != 202 {
            return Err(Error::UnexpectedStatus(status_line(&res)));
        }
        let loc = res.header("Location").ok_or(Error::MissingLocation)?;
        let upload = Url::parse(loc).or_else(|_| url.join(loc))?;

        let req = self
            .put(&upload)
            .query("digest", &digest.to_string())
            .set("Content-Type", "application/octet-stream");
        let res = self.send_bytes(req, blob)?;
        if res.status() != 201 {
            return Err(Error::UnexpectedStatus(status_line(&res)));
        }
        Ok(digest)
    }

    /// Get all tags of the repository, following pagination links.
    ///
    /// ```text
    /// GET /v2/<name>/tags/list
    /// ```
    pub fn get_tags(&mut self) -> Result<Vec<String>> {
        let url = self
            .url(&format!("/v2/{}/tags/list", self.reference.name))?;
        tags::list_all(self, url)
    }
}

/// Probe `/v2/` on a bare host and return its challenge, if any.
///
/// `None` means the registry requires no authentication.
pub fn probe_challenge(
    agent: &ureq::Agent,
    scheme: Scheme,
    host: &str,
) -> Result<Option<AuthChallenge>> {
    let url = registry_url(scheme, host, "/v2/")?;
    log::info!("GET {}", url);
    match agent.get(url.as_str()).call() {
        Ok(_) => Ok(None),
        Err(ureq::Error::Status(401, res)) => {
            let headers = res.all("www-authenticate");
            Ok(Some(AuthChallenge::from_headers(&headers)?))
        }
        Err(ureq::Error::Status(_, res)) => Err(Error::UnexpectedStatus(status_line(&res))),
        Err(ureq::Error::Transport(e)) => Err(e.into()),
    }
}

pub(crate) fn status_line(res: &ureq::Response) -> String {
    format!("{} {}", res.status(), res.status_text())
}

fn exec(
    req: ureq::Request,
    body: Option<&[u8]>,
) -> std::result::Result<ureq::Response, ureq::Error> {
    match body {
        Some(body) => req.send_bytes(body),
        None => req.call(),
    }
}

fn flatten(result: std::result::Result<ureq::Response, ureq::Error>) -> Result<ureq::Response> {
    match result {
        Ok(res) => Ok(res),
        Err(ureq::Error::Status(_, res)) => Ok(res),
        Err(ureq::Error::Transport(e)) => Err(e.into()),
    }
}
