//! Image reference parsing.
//!
//! References follow the familiar `[registry/]repository[:tag][@digest]`
//! shape. The lifecycle core treats them as opaque strings; this parser
//! serves default naming and the local backend's pull validation.

use std::fmt;
use std::str::FromStr;

use nebulabox_common::error::{NebulaboxError, Result};

/// Tag assumed when a reference names none.
pub const DEFAULT_TAG: &str = "latest";

const MAX_TAG_LENGTH: usize = 128;

/// A parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry host (with optional port), if one was named.
    pub registry: Option<String>,
    /// Repository path, e.g. `library/nginx`.
    pub repository: String,
    /// Tag, if one was named.
    pub tag: Option<String>,
    /// Content digest (`algorithm:hex`), if one was named.
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parses a reference string.
    ///
    /// # Errors
    ///
    /// Returns [`NebulaboxError::InvalidOptions`] if the reference is empty
    /// or any component is malformed.
    pub fn parse(reference: &str) -> Result<Self> {
        let invalid = |why: &str| NebulaboxError::InvalidOptions {
            message: format!("invalid image reference '{reference}': {why}"),
        };

        if reference.is_empty() {
            return Err(invalid("empty"));
        }
        if reference.chars().any(char::is_whitespace) {
            return Err(invalid("contains whitespace"));
        }

        let (name_part, digest) = match reference.split_once('@') {
            Some((name, digest)) => {
                validate_digest(digest).map_err(|why| invalid(why))?;
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        let last_slash = name_part.rfind('/').map_or(0, |idx| idx + 1);
        let (path, tag) = match name_part[last_slash..].rfind(':') {
            Some(idx) => {
                let split = last_slash + idx;
                (&name_part[..split], Some(&name_part[split + 1..]))
            }
            None => (name_part, None),
        };
        if let Some(tag) = tag {
            validate_tag(tag).map_err(|why| invalid(why))?;
        }

        let (registry, repository) = match path.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first.to_string()), rest)
            }
            _ => (None, path),
        };
        validate_repository(repository).map_err(|why| invalid(why))?;

        Ok(Self {
            registry,
            repository: repository.to_string(),
            tag: tag.map(str::to_string),
            digest,
        })
    }

    /// Returns the last repository component, e.g. `nginx` for
    /// `docker.io/library/nginx:1.27`.
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.repository
            .rsplit('/')
            .next()
            .unwrap_or(self.repository.as_str())
    }

    /// Returns the tag, or [`DEFAULT_TAG`] when only a digest or nothing
    /// was given.
    #[must_use]
    pub fn tag_or_default(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }
}

impl FromStr for ImageReference {
    type Err = NebulaboxError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{registry}/")?;
        }
        f.write_str(&self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

fn validate_repository(repository: &str) -> std::result::Result<(), &'static str> {
    if repository.is_empty() {
        return Err("missing repository");
    }
    for component in repository.split('/') {
        let valid_chars = component
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'));
        let valid_edges = component
            .chars()
            .next()
            .zip(component.chars().last())
            .is_some_and(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric());
        if !valid_chars || !valid_edges {
            return Err("repository components must be lowercase alphanumerics separated by '.', '_' or '-'");
        }
    }
    Ok(())
}

fn validate_tag(tag: &str) -> std::result::Result<(), &'static str> {
    if tag.is_empty() || tag.len() > MAX_TAG_LENGTH {
        return Err("tag must be 1 to 128 characters");
    }
    if tag.starts_with(['.', '-']) {
        return Err("tag may not start with '.' or '-'");
    }
    if !tag
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err("tag contains invalid characters");
    }
    Ok(())
}

fn validate_digest(digest: &str) -> std::result::Result<(), &'static str> {
    let Some((algorithm, hex)) = digest.split_once(':') else {
        return Err("digest must be algorithm:hex");
    };
    if algorithm.is_empty() || hex.len() < 32 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err("digest must be algorithm:hex");
    }
    Ok(())
}
