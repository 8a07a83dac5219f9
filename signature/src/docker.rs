// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Verification of simple signing signatures against a known manifest and
//! image identity.

use chrono::{DateTime, Utc};

use crate::digest::{manifest_matches_digest, Digest};
use crate::mechanism::{SequoiaMechanism, SigningMechanism};
use crate::payload::simple_signing::{
    verify_and_extract_signature, Signature, SignatureAcceptanceRules, UntrustedSignature,
};
use crate::reference::Reference;
use crate::{Error, Result};

/// Checks that `unverified_signature` uses `expected_key_identity` to sign
/// `unverified_manifest` as `expected_docker_reference`, using `mech`.
pub fn verify_docker_manifest_signature(
    unverified_signature: &[u8],
    unverified_manifest: &[u8],
    expected_docker_reference: &str,
    mech: &dyn SigningMechanism,
    expected_key_identity: &str,
) -> Result<Signature> {
    let (sig, _) = verify_image_manifest_signature_using_key_identity_list(
        unverified_signature,
        unverified_manifest,
        expected_docker_reference,
        mech,
        &[expected_key_identity.to_string()],
    )?;
    Ok(sig)
}

struct KeyIdentityListRules<'a> {
    expected_key_identities: &'a [String],
    expected_reference: Reference,
    expected_docker_reference: &'a str,
    unverified_manifest: &'a [u8],
    matched_key_identity: Option<String>,
}

impl SignatureAcceptanceRules for KeyIdentityListRules<'_> {
    fn validate_key_identity(&mut self, key_identity: &str) -> Result<()> {
        if !self.expected_key_identities.iter().any(|k| k == key_identity) {
            return Err(Error::PolicyRequirement(format!(
                "Signature by {key_identity} does not match expected fingerprints {:?}",
                self.expected_key_identities
            )));
        }
        self.matched_key_identity = Some(key_identity.to_string());
        Ok(())
    }

    fn validate_signed_docker_reference(&mut self, signed_docker_reference: &str) -> Result<()> {
        let signed_reference = Reference::parse_normalized_named(signed_docker_reference)
            .map_err(|_| {
                Error::InvalidSignature(format!(
                    "Invalid docker reference {signed_docker_reference:?} in signature"
                ))
            })?;
        if signed_reference != self.expected_reference {
            return Err(Error::PolicyRequirement(format!(
                "Docker reference {signed_docker_reference:?} does not match {:?}",
                self.expected_docker_reference
            )));
        }
        Ok(())
    }

    fn validate_signed_docker_manifest_digest(&mut self, signed_digest: &Digest) -> Result<()> {
        if !manifest_matches_digest(self.unverified_manifest, signed_digest)? {
            return Err(Error::PolicyRequirement(format!(
                "Signature for docker digest {:?} does not match",
                signed_digest.to_string()
            )));
        }
        Ok(())
    }
}

/// Checks that `unverified_signature` uses one of `expected_key_identities`
/// to sign `unverified_manifest` as `expected_docker_reference`, using
/// `mech`. Returns the verified signature and the key identity that was
/// used to verify it.
pub fn verify_image_manifest_signature_using_key_identity_list(
    unverified_signature: &[u8],
    unverified_manifest: &[u8],
    expected_docker_reference: &str,
    mech: &dyn SigningMechanism,
    expected_key_identities: &[String],
) -> Result<(Signature, String)> {
    let expected_reference = Reference::parse_normalized_named(expected_docker_reference)
        .map_err(|e| {
            Error::InvalidConfiguration(format!(
                "invalid expected docker reference {expected_docker_reference:?}: {e}"
            ))
        })?;

    let mut rules = KeyIdentityListRules {
        expected_key_identities,
        expected_reference,
        expected_docker_reference,
        unverified_manifest,
        matched_key_identity: None,
    };
    let sig = verify_and_extract_signature(mech, unverified_signature, &mut rules)?;
    let key_identity = rules
        .matched_key_identity
        .ok_or_else(|| Error::Internal("accepted signature without a key identity".into()))?;
    Ok((sig, key_identity))
}

/// Information available in an untrusted signature.
///
/// This may be useful when debugging signature verification failures, or
/// when managing a set of signatures on a single image.
///
/// WARNING: Do not use the contents of this for ANY security decisions.
/// There is no reason to expect these values to be correct, or not
/// intentionally misleading.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UntrustedSignatureInformation {
    pub untrusted_docker_manifest_digest: Digest,
    pub untrusted_docker_reference: String,
    pub untrusted_creator_id: Option<String>,
    pub untrusted_timestamp: Option<DateTime<Utc>>,
    pub untrusted_short_key_identifier: String,
}

/// Returns the information in a signature WITHOUT verifying it.
pub fn get_untrusted_signature_information_without_verifying(
    untrusted_signature: &[u8],
) -> Result<UntrustedSignatureInformation> {
    let mut mech = SequoiaMechanism::default();
    let info = untrusted_signature_information(&mech, untrusted_signature);
    mech.close()?;
    info
}

/// Like [`get_untrusted_signature_information_without_verifying`], reading
/// the signature envelope with `mech`.
pub fn untrusted_signature_information(
    mech: &dyn SigningMechanism,
    untrusted_signature: &[u8],
) -> Result<UntrustedSignatureInformation> {
    let (contents, short_key_identifier) = mech.untrusted_signature_contents(untrusted_signature)?;
    let decoded = UntrustedSignature::from_json(&contents)?;

    let untrusted_timestamp = match decoded.untrusted_timestamp {
        Some(secs) => Some(DateTime::from_timestamp(secs, 0).ok_or_else(|| {
            Error::InvalidSignature(format!("timestamp {secs} is out of range"))
        })?),
        None => None,
    };

    Ok(UntrustedSignatureInformation {
        untrusted_docker_manifest_digest: decoded.untrusted_docker_manifest_digest,
        untrusted_docker_reference: decoded.untrusted_docker_reference,
        untrusted_creator_id: decoded.untrusted_creator_id,
        untrusted_timestamp,
        untrusted_short_key_identifier: short_key_identifier,
    })
}
