// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Docker-style image references and their normalized (canonical) form.
//!
//! Parsing and normalization are done by `oci_client::Reference`:
//! `busybox`, `library/busybox` and `docker.io/library/busybox` all
//! normalize to `docker.io/library/busybox`. Unlike the registry client, no
//! default tag is added: a reference without a tag or digest stays "name
//! only", which matters for signing and for policy scopes.

use std::{fmt, str::FromStr};

use oci_client::Reference as OciReference;
use thiserror::Error;

use crate::digest::Digest;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("invalid reference format: {0}")]
    InvalidFormat(String),

    #[error("invalid repository name (64 hex), cannot specify 64-byte hexadecimal strings")]
    NameIsIdentifier,

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("repository name must be canonical")]
    NameNotCanonical,
}

/// A parsed, normalized image reference: `domain/path[:tag][@digest]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Reference {
    domain: String,
    path: String,
    tag: Option<String>,
    digest: Option<Digest>,
}

impl Reference {
    /// Parses a possibly abbreviated reference and normalizes it, filling in
    /// the default domain and the official repository namespace.
    pub fn parse_normalized_named(s: &str) -> Result<Self, ReferenceError> {
        if is_identifier(s) {
            return Err(ReferenceError::NameIsIdentifier);
        }

        let parsed =
            OciReference::try_from(s).map_err(|e| ReferenceError::InvalidFormat(e.to_string()))?;

        let digest = parsed
            .digest()
            .map(Digest::from_str)
            .transpose()
            .map_err(|e| ReferenceError::InvalidDigest(e.to_string()))?;

        // The registry client reports "latest" for references without a
        // tag or digest; only a tag written in `s` counts.
        let tag = match has_explicit_tag(s) {
            true => parsed.tag().map(str::to_string),
            false => None,
        };

        Ok(Reference {
            domain: parsed.registry().to_string(),
            path: parsed.repository().to_string(),
            tag,
            digest,
        })
    }

    /// Parses a reference which must already be in its canonical form.
    pub fn parse_named(s: &str) -> Result<Self, ReferenceError> {
        let reference = Self::parse_normalized_named(s)?;
        if reference.to_string() != s {
            return Err(ReferenceError::NameNotCanonical);
        }
        Ok(reference)
    }

    /// The registry host, with an optional port.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The repository path within the registry.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&Digest> {
        self.digest.as_ref()
    }

    /// The repository name: `domain/path`, without tag or digest.
    pub fn name(&self) -> String {
        format!("{}/{}", self.domain, self.path)
    }

    /// Returns true if the reference carries neither a tag nor a digest.
    pub fn is_name_only(&self) -> bool {
        self.tag.is_none() && self.digest.is_none()
    }

    /// Returns a list of policy configuration namespaces to search, from the
    /// repository itself up to its registry, followed by wildcarded domains.
    pub fn namespaces(&self) -> Vec<String> {
        // Note that this only happens on the expanded host names and
        // repository names, i.e. "busybox" is looked up as
        // "docker.io/library/busybox", then in its parent "docker.io/library";
        // in none of "busybox", un-namespaced "library" nor in "".
        let mut res = Vec::new();
        let mut name = self.name();

        loop {
            res.push(name.clone());
            match name.rsplit_once('/') {
                None => break,
                Some((parent, _)) => name = parent.to_string(),
            }
        }

        // Strip the port number, if any, before building wildcards:
        // example.com:8443/ns, example.com:8443, *.com.
        if let Some((host, _)) = name.rsplit_once(':') {
            name = host.to_string();
        }

        while let Some((_, rest)) = name.split_once('.') {
            name = rest.to_string();
            res.push(format!("*.{name}"));
        }

        res
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.path)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

impl FromStr for Reference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_normalized_named(s)
    }
}

impl TryFrom<&str> for Reference {
    type Error = ReferenceError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::parse_normalized_named(s)
    }
}

// A tag is a `:` in the last path component, before any digest. A `:` in the
// first component of a multi-component name is a registry port.
fn has_explicit_tag(s: &str) -> bool {
    let name = s.split_once('@').map_or(s, |(name, _)| name);
    name.rsplit('/').next().is_some_and(|last| last.contains(':'))
}

fn is_identifier(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

// [a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]
fn is_valid_domain_component(c: &str) -> bool {
    !c.is_empty()
        && c.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
        && !c.starts_with('-')
        && !c.ends_with('-')
}

/// Returns true if `s` is a registry host name, with an optional port.
///
/// Policy scopes and identity prefixes may name a bare registry, or a
/// wildcarded one, which are not image references.
pub(crate) fn is_valid_domain(s: &str) -> bool {
    let (host, port) = match s.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (s, None),
    };
    if let Some(port) = port {
        if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
    }
    host.split('.').all(is_valid_domain_component)
}

/// Returns true if `s` is a canonical repository name, with an explicit
/// domain and without tag or digest.
pub(crate) fn is_valid_full_name(s: &str) -> bool {
    s.contains('/') && Reference::parse_named(s).is_ok_and(|r| r.is_name_only())
}
