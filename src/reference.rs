use crate::{error::*, Digest, Name};
use regex::Regex;
use std::fmt;

/// Reference to an image in a registry, `[host/]repository[:tag|@digest]`
///
/// The first path component names a registry host only if it contains `.`
/// or `:` or is `localhost`; otherwise the whole string is a repository on
/// Docker Hub. The tag defaults to `latest` when neither a tag nor a digest
/// is given.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    pub host: String,
    pub name: Name,
    pub tag: Option<String>,
    pub digest: Option<Digest>,
}

lazy_static::lazy_static! {
    static ref TAG_RE: Regex = Regex::new(r"^[a-zA-Z0-9_][a-zA-Z0-9._-]{0,127}$").unwrap();
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host, self.name)?;
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)
        } else if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)
        } else {
            Ok(())
        }
    }
}

impl ImageReference {
    pub fn parse(input: &str) -> Result<Self> {
        let (rest, digest) = match input.split_once('@') {
            Some((rest, digest)) => (rest, Some(Digest::new(digest)?)),
            None => (input, None),
        };

        let (host, path) = match rest.split_once('/') {
            Some((host, path)) if host.contains('.') || host.contains(':') || host == "localhost" => {
                (host, path)
            }
            _ => ("docker.io", rest),
        };

        let (path, tag) = match path.rsplit_once(':') {
            Some((path, tag)) if !tag.contains('/') => {
                if !TAG_RE.is_match(tag) {
                    return Err(Error::InvalidReference(input.to_string()));
                }
                (path, Some(tag.to_string()))
            }
            _ => (path, None),
        };

        Ok(ImageReference {
            host: host.to_string(),
            name: Name::new(path)?,
            tag,
            digest,
        })
    }

    /// Tag or digest used in manifest URLs.
    ///
    /// A digest takes precedence over a tag; with neither, the tag defaults
    /// to `latest`.
    pub fn manifest_name(&self) -> String {
        if let Some(digest) = &self.digest {
            digest.to_string()
        } else if let Some(tag) = &self.tag {
            tag.clone()
        } else {
            "latest".to_string()
        }
    }

    /// Repository path used in authorization scopes. The host is excluded.
    pub fn scope_path(&self) -> &str {
        self.name.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_reference() -> Result<()> {
        let reference = ImageReference::parse("ghcr.io/skiff-rs/skiff:0.1.0")?;
        assert_eq!(
            reference,
            ImageReference {
                host: "ghcr.io".to_string(),
                name: Name::new("skiff-rs/skiff")?,
                tag: Some("0.1.0".to_string()),
                digest: None,
            }
        );

        let reference = ImageReference::parse("localhost:5000/test_repo")?;
        assert_eq!(
            reference,
            ImageReference {
                host: "localhost:5000".to_string(),
                name: Name::new("test_repo")?,
                tag: None,
                digest: None,
            }
        );

        let reference = ImageReference::parse("ubuntu:20.04")?;
        assert_eq!(
            reference,
            ImageReference {
                host: "docker.io".to_string(),
                name: Name::new("ubuntu")?,
                tag: Some("20.04".to_string()),
                digest: None,
            }
        );

        let reference = ImageReference::parse("dmage/foo")?;
        assert_eq!(
            reference,
            ImageReference {
                host: "docker.io".to_string(),
                name: Name::new("dmage/foo")?,
                tag: None,
                digest: None,
            }
        );

        Ok(())
    }

    #[test]
    fn manifest_name_defaults_to_latest() {
        let reference = ImageReference::parse("busybox").unwrap();
        assert_eq!(reference.manifest_name(), "latest");
    }

    #[test]
    fn manifest_name_prefers_digest() {
        let digest = "sha256:ee44b399df993016003bf5466bd3eeb221305e9d0fa831606bc7902d149c775b";
        let reference = ImageReference::parse(&format!("busybox@{}", digest)).unwrap();
        assert_eq!(reference.manifest_name(), digest);

        let reference = ImageReference::parse(&format!("busybox:stable@{}", digest)).unwrap();
        assert_eq!(reference.manifest_name(), digest);
    }

    #[test]
    fn invalid_references() {
        assert!(ImageReference::parse("busybox:").is_err());
        assert!(ImageReference::parse("busybox@sha256").is_err());
        assert!(ImageReference::parse("BusyBox").is_err());
    }
}
