// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Payload format of simple signing
//!
//! The signed document is a JSON object with exactly two members:
//!
//! ```json
//! {
//!     "critical": {
//!         "type": "atomic container signature",
//!         "image": { "docker-manifest-digest": "sha256:..." },
//!         "identity": { "docker-reference": "docker.io/library/busybox:latest" }
//!     },
//!     "optional": {
//!         "creator": "...",
//!         "timestamp": 1634533638
//!     }
//! }
//! ```
//!
//! Everything in `critical` must be understood by the verifier, so unknown
//! members there are rejected. Unknown members of `optional` are ignored.

use std::str::FromStr;

use serde_json::value::RawValue;
use serde_json::{json, Map, Value};

use super::paranoid::{string_value, ParanoidObject};
use crate::digest::Digest;
use crate::mechanism::SigningMechanism;
use crate::{Error, Result};

pub const SIGNATURE_TYPE: &str = "atomic container signature";

const CREATOR_ID: &str = concat!("image-signature ", env!("CARGO_PKG_VERSION"));

/// A verified signature.
///
/// The only way to get one from a blob is a successful call to
/// [`verify_and_extract_signature`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    docker_manifest_digest: Digest,
    docker_reference: String,
}

impl Signature {
    pub fn docker_manifest_digest(&self) -> &Digest {
        &self.docker_manifest_digest
    }

    pub fn docker_reference(&self) -> &str {
        &self.docker_reference
    }
}

/// The parsed contents of a signature which has not been accepted (yet).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UntrustedSignature {
    pub untrusted_docker_manifest_digest: Digest,
    pub untrusted_docker_reference: String,
    pub untrusted_creator_id: Option<String>,
    // Whole seconds only; fractional values are rejected when decoding.
    pub untrusted_timestamp: Option<i64>,
}

impl UntrustedSignature {
    /// Returns a signature for the given digest and reference, with creator
    /// and timestamp set for the current time.
    pub fn new(docker_manifest_digest: Digest, docker_reference: impl Into<String>) -> Self {
        UntrustedSignature {
            untrusted_docker_manifest_digest: docker_manifest_digest,
            untrusted_docker_reference: docker_reference.into(),
            untrusted_creator_id: Some(CREATOR_ID.to_string()),
            untrusted_timestamp: Some(chrono::Utc::now().timestamp()),
        }
    }

    /// Encodes the signature in the simple signing format.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        if self.untrusted_docker_reference.is_empty() {
            return Err(Error::InvalidSignature(
                "Unexpected empty signature content".into(),
            ));
        }

        let mut optional = Map::new();
        if let Some(creator) = &self.untrusted_creator_id {
            optional.insert("creator".into(), Value::from(creator.as_str()));
        }
        if let Some(timestamp) = self.untrusted_timestamp {
            optional.insert("timestamp".into(), Value::from(timestamp));
        }

        let document = json!({
            "critical": {
                "type": SIGNATURE_TYPE,
                "image": {
                    "docker-manifest-digest": self.untrusted_docker_manifest_digest.to_string(),
                },
                "identity": {
                    "docker-reference": self.untrusted_docker_reference,
                },
            },
            "optional": optional,
        });

        serde_json::to_vec(&document).map_err(|e| Error::Internal(e.to_string()))
    }

    /// Decodes a simple signing document, refusing anything it does not
    /// fully understand.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let [critical, optional] =
            ParanoidObject::from_slice(data)?.exact_fields(["critical", "optional"])?;

        let mut untrusted_creator_id = None;
        let mut untrusted_timestamp = None;
        for (key, value) in ParanoidObject::from_raw(&optional)?.into_members() {
            match key.as_str() {
                "creator" => untrusted_creator_id = Some(string_value(&value, "optional.creator")?),
                "timestamp" => untrusted_timestamp = Some(parse_timestamp(&value)?),
                _ => {}
            }
        }

        let [signature_type, image, identity] =
            ParanoidObject::from_raw(&critical)?.exact_fields(["type", "image", "identity"])?;
        let signature_type = string_value(&signature_type, "critical.type")?;
        if signature_type != SIGNATURE_TYPE {
            return Err(Error::InvalidSignature(format!(
                "Unrecognized signature type {signature_type}"
            )));
        }

        let [digest] = ParanoidObject::from_raw(&image)?.exact_fields(["docker-manifest-digest"])?;
        let digest = string_value(&digest, "critical.image.docker-manifest-digest")?;
        let untrusted_docker_manifest_digest = Digest::from_str(&digest).map_err(|e| {
            Error::InvalidSignature(format!(
                "invalid docker-manifest-digest value {digest:?}: {e}"
            ))
        })?;

        let [reference] = ParanoidObject::from_raw(&identity)?.exact_fields(["docker-reference"])?;
        let untrusted_docker_reference =
            string_value(&reference, "critical.identity.docker-reference")?;

        Ok(UntrustedSignature {
            untrusted_docker_manifest_digest,
            untrusted_docker_reference,
            untrusted_creator_id,
            untrusted_timestamp,
        })
    }

    /// Encodes the signature and signs it with `key_identity` using `mech`.
    ///
    /// A passphrase can only be used with mechanisms which support them.
    pub fn sign(
        &self,
        mech: &dyn SigningMechanism,
        key_identity: &str,
        passphrase: Option<&str>,
    ) -> Result<Vec<u8>> {
        let payload = self.to_json()?;
        let passphrase = passphrase.filter(|p| !p.is_empty());

        match (mech.as_passphrase_signer(), passphrase) {
            (Some(signer), passphrase) => {
                signer.sign_with_passphrase(&payload, key_identity, passphrase.unwrap_or_default())
            }
            (None, Some(_)) => Err(Error::UnsupportedOperation(
                "signing mechanism does not support passphrases".into(),
            )),
            (None, None) => mech.sign(&payload, key_identity),
        }
    }
}

fn parse_timestamp(raw: &RawValue) -> Result<i64> {
    let number: serde_json::Number = serde_json::from_str(raw.get()).map_err(|e| {
        Error::InvalidSignature(format!("Field optional.timestamp is not a number: {e}"))
    })?;
    if let Some(timestamp) = number.as_i64() {
        return Ok(timestamp);
    }
    match number.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => Ok(f as i64),
        _ => Err(Error::InvalidSignature(
            "Field optional.timestamp is not an integer".into(),
        )),
    }
}

/// Decides whether the contents of a cryptographically valid signature are
/// acceptable. Each check returns the reason for rejecting the signature.
pub trait SignatureAcceptanceRules {
    fn validate_key_identity(&mut self, key_identity: &str) -> Result<()>;

    fn validate_signed_docker_reference(&mut self, signed_docker_reference: &str) -> Result<()>;

    fn validate_signed_docker_manifest_digest(
        &mut self,
        signed_docker_manifest_digest: &Digest,
    ) -> Result<()>;
}

/// Verifies that `unverified_signature` has been signed, and that its
/// principal components match expected values, both as specified by
/// `rules`, and returns it.
pub fn verify_and_extract_signature(
    mech: &dyn SigningMechanism,
    unverified_signature: &[u8],
    rules: &mut dyn SignatureAcceptanceRules,
) -> Result<Signature> {
    let (signed, key_identity) = mech.verify(unverified_signature)?;
    rules.validate_key_identity(&key_identity)?;

    let untrusted = UntrustedSignature::from_json(&signed).map_err(|e| match e {
        Error::InvalidSignature(_) => e,
        other => Error::InvalidSignature(other.to_string()),
    })?;
    rules.validate_signed_docker_manifest_digest(&untrusted.untrusted_docker_manifest_digest)?;
    rules.validate_signed_docker_reference(&untrusted.untrusted_docker_reference)?;

    Ok(Signature {
        docker_manifest_digest: untrusted.untrusted_docker_manifest_digest,
        docker_reference: untrusted.untrusted_docker_reference,
    })
}
