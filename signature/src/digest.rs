// Copyright (c) 2022 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0

//! Content digests of image manifests, in the `algorithm:hex` form.

use std::{fmt, str::FromStr};

use serde::Deserialize;
use sha2::Digest as _;
use strum::{Display, EnumString};
use thiserror::Error;

use crate::{Error, Result};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DigestError {
    #[error("invalid checksum digest format")]
    InvalidFormat,

    #[error("unsupported digest algorithm")]
    Unsupported,

    #[error("invalid checksum digest length")]
    InvalidLength,
}

#[derive(EnumString, Display, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Algorithm {
    #[strum(serialize = "sha256")]
    Sha256,
    #[strum(serialize = "sha384")]
    Sha384,
    #[strum(serialize = "sha512")]
    Sha512,
}

impl Algorithm {
    /// Length of the hex encoding of a digest produced by this algorithm.
    fn encoded_len(&self) -> usize {
        match self {
            Algorithm::Sha256 => 64,
            Algorithm::Sha384 => 96,
            Algorithm::Sha512 => 128,
        }
    }

    fn hasher(&self) -> DigestHasher {
        match self {
            Algorithm::Sha256 => DigestHasher::Sha256(sha2::Sha256::new()),
            Algorithm::Sha384 => DigestHasher::Sha384(sha2::Sha384::new()),
            Algorithm::Sha512 => DigestHasher::Sha512(sha2::Sha512::new()),
        }
    }

    pub fn digest(&self, data: &[u8]) -> Digest {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize()
    }
}

#[derive(Clone, Debug)]
enum DigestHasher {
    Sha256(sha2::Sha256),
    Sha384(sha2::Sha384),
    Sha512(sha2::Sha512),
}

impl DigestHasher {
    fn update(&mut self, buf: &[u8]) {
        match self {
            DigestHasher::Sha256(hasher) => hasher.update(buf),
            DigestHasher::Sha384(hasher) => hasher.update(buf),
            DigestHasher::Sha512(hasher) => hasher.update(buf),
        }
    }

    fn finalize(self) -> Digest {
        let (algorithm, encoded) = match self {
            DigestHasher::Sha256(hasher) => (Algorithm::Sha256, hex::encode(hasher.finalize())),
            DigestHasher::Sha384(hasher) => (Algorithm::Sha384, hex::encode(hasher.finalize())),
            DigestHasher::Sha512(hasher) => (Algorithm::Sha512, hex::encode(hasher.finalize())),
        };
        Digest { algorithm, encoded }
    }
}

/// A validated content digest. Values of this type always name a supported
/// algorithm and carry a lowercase hex encoding of the right length.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: Algorithm,
    encoded: String,
}

impl Digest {
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }
}

fn is_valid_algorithm_name(name: &str) -> bool {
    // [a-z0-9]+(?:[.+_-][a-z0-9]+)*
    let is_component_char = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    name.split(['.', '+', '_', '-'])
        .all(|part| !part.is_empty() && part.chars().all(is_component_char))
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (name, encoded) = match s.split_once(':') {
            Some((name, encoded)) if !name.is_empty() && !encoded.is_empty() => (name, encoded),
            _ => return Err(DigestError::InvalidFormat),
        };

        let algorithm = match Algorithm::from_str(name) {
            Ok(algorithm) => algorithm,
            Err(_) => {
                if !is_valid_algorithm_name(name)
                    || !encoded
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '=' | '_' | '-'))
                {
                    return Err(DigestError::InvalidFormat);
                }
                return Err(DigestError::Unsupported);
            }
        };

        if encoded.len() != algorithm.encoded_len() {
            return Err(DigestError::InvalidLength);
        }
        if !encoded
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return Err(DigestError::InvalidFormat);
        }

        Ok(Digest {
            algorithm,
            encoded: encoded.to_string(),
        })
    }
}

impl TryFrom<&str> for Digest {
    type Error = DigestError;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.encoded)
    }
}

// Schema 1 manifests embed JWS signatures which must be stripped before
// hashing. That transformation is schema-specific and not supported here, so
// such manifests are refused instead of producing a digest nobody else would.
fn is_signed_schema1(manifest: &[u8]) -> bool {
    #[derive(Deserialize)]
    struct VersionFields {
        #[serde(rename = "schemaVersion")]
        schema_version: Option<i64>,
        signatures: Option<serde_json::Value>,
    }

    match serde_json::from_slice::<VersionFields>(manifest) {
        Ok(fields) => fields.schema_version == Some(1) && fields.signatures.is_some(),
        Err(_) => false,
    }
}

/// Returns the digest of a manifest, as used to identify the image.
pub fn manifest_digest(manifest: &[u8]) -> Result<Digest> {
    manifest_digest_with_algorithm(manifest, Algorithm::Sha256)
}

fn manifest_digest_with_algorithm(manifest: &[u8], algorithm: Algorithm) -> Result<Digest> {
    if is_signed_schema1(manifest) {
        return Err(Error::Unimplemented(
            "computing the digest of a signed schema 1 manifest is not supported".into(),
        ));
    }
    Ok(algorithm.digest(manifest))
}

/// Returns true if `manifest` hashes to `expected`, using the algorithm of `expected`.
pub fn manifest_matches_digest(manifest: &[u8], expected: &Digest) -> Result<bool> {
    let actual = manifest_digest_with_algorithm(manifest, expected.algorithm())?;
    Ok(actual == *expected)
}
