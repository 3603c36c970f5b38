//! Client for the [Docker Registry HTTP API](https://docs.docker.com/registry/spec/api/)
//!
//! The client negotiates the authentication scheme demanded by the registry
//! (anonymous, HTTP Basic, or a bearer-token exchange), falls back from
//! HTTPS to HTTP when allowed, and attaches the resulting authorization to
//! every request it issues.

mod auth;
mod client;
mod tags;

#[cfg(test)]
mod test_server;

pub use auth::{
    fetch_token, Anonymous, AuthChallenge, BasicCredentials, BearerToken, CredentialStore,
    RefreshTokenCredentials,
};
pub use client::{
    probe_challenge, registry_url, Client, GetManifestOptions, Scheme, MEDIA_TYPE_MANIFEST_LIST,
    MEDIA_TYPE_OCI_INDEX, MEDIA_TYPE_OCI_MANIFEST, MEDIA_TYPE_SCHEMA1, MEDIA_TYPE_SCHEMA2,
};
pub use tags::MAX_RESPONSE_SIZE;
