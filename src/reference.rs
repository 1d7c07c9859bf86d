//! Image reference parsing.
//!
//! A reference has the shape `[registry/]repository[:tag][@digest]`. The
//! registry prefix is told apart from the first repository segment by the
//! grammar alone: a host must contain a dot, carry a port, contain an
//! uppercase letter or be `localhost`.

use crate::error::{RegistryError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

/// Tag used when a reference names neither a tag nor a digest.
pub const DEFAULT_TAG: &str = "latest";

const HOST_PART: &str = r"(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)";
const HOST_UPPER: &str =
    r"(?:[a-zA-Z0-9]*[A-Z][a-zA-Z0-9-]*[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[A-Z][a-zA-Z0-9]*)";
const REPO_PART: &str = r"[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*";
const TAG: &str = r"[a-zA-Z0-9_][a-zA-Z0-9._-]{0,127}";
const DIGEST: &str = r"[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*[:][[:xdigit:]]{32,}";

fn reference_pattern() -> String {
    let dot = regex::escape(".");
    let colon = regex::escape(":");
    let slash = regex::escape("/");

    let host_port = format!("(?:{HOST_PART}(?:{dot}{HOST_PART})*{dot}?{colon}[0-9]+)");
    let host_domain = format!("(?:{HOST_PART}(?:(?:{dot}{HOST_PART})+{dot}?|{dot}))");
    let registry =
        format!("(?:{host_domain}|{host_port}|{HOST_UPPER}|localhost(?:{colon}[0-9]+)?)");

    format!(
        "^(?:({registry}){slash})?({REPO_PART}(?:{slash}{REPO_PART})*)(?:{colon}({TAG}))?(?:{at}({DIGEST}))?$",
        at = regex::escape("@"),
    )
}

lazy_static! {
    static ref REFERENCE_RE: Regex =
        Regex::new(&reference_pattern()).expect("image reference grammar is a valid regex");
}

/// A parsed image reference.
///
/// Absent parts are `None`. A reference may carry both a tag and a digest;
/// the digest wins when addressing a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    pub registry: Option<String>,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    /// Splits `reference` into registry, repository, tag and digest.
    ///
    /// # Examples
    ///
    /// ```
    /// use olareg_testkit::ImageReference;
    ///
    /// let r = ImageReference::parse("localhost:5000/alpine:latest").unwrap();
    /// assert_eq!(r.registry.as_deref(), Some("localhost:5000"));
    /// assert_eq!(r.repository, "alpine");
    /// assert_eq!(r.tag.as_deref(), Some("latest"));
    /// assert_eq!(r.digest, None);
    /// ```
    pub fn parse(reference: &str) -> Result<Self> {
        let caps = REFERENCE_RE
            .captures(reference)
            .ok_or_else(|| RegistryError::InvalidReference(reference.to_string()))?;

        let group = |i: usize| caps.get(i).map(|m| m.as_str().to_string());

        Ok(Self {
            registry: group(1),
            repository: caps
                .get(2)
                .map(|m| m.as_str().to_string())
                .ok_or_else(|| RegistryError::InvalidReference(reference.to_string()))?,
            tag: group(3),
            digest: group(4),
        })
    }

    /// Tag to address when no digest is given, defaulting to `latest`.
    pub fn effective_tag(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }

    /// The manifest selector: the digest if present, otherwise the tag.
    pub fn selector(&self) -> &str {
        self.digest.as_deref().unwrap_or_else(|| self.effective_tag())
    }

    /// Registry v2 path of the manifest this reference points at.
    pub fn manifest_path(&self) -> String {
        format!("/v2/{}/manifests/{}", self.repository, self.selector())
    }
}

impl FromStr for ImageReference {
    type Err = RegistryError;

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
