// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Evaluation of `signedBy` requirements.

use log::debug;

use super::policy_requirement::{KeyType, PrSignedBy, SignatureAcceptanceResult};
use super::ref_match::PolicyReqMatchType;
use super::verification_cache::{VerificationCache, VerificationCaches};
use crate::digest::{manifest_matches_digest, Digest};
use crate::image::UnparsedImage;
use crate::payload::simple_signing::{
    verify_and_extract_signature, Signature, SignatureAcceptanceRules,
};
use crate::{Error, Result};

struct SignedByRules<'a> {
    trusted_identities: &'a [String],
    signed_identity: &'a PolicyReqMatchType,
    image: &'a dyn UnparsedImage,
}

impl SignatureAcceptanceRules for SignedByRules<'_> {
    fn validate_key_identity(&mut self, key_identity: &str) -> Result<()> {
        if !self.trusted_identities.iter().any(|k| k == key_identity) {
            return Err(Error::PolicyRequirement(format!(
                "Signature by key {key_identity} is not accepted"
            )));
        }
        Ok(())
    }

    fn validate_signed_docker_reference(&mut self, signed_docker_reference: &str) -> Result<()> {
        if !self
            .signed_identity
            .matches_docker_reference(self.image.docker_reference(), signed_docker_reference)
        {
            return Err(Error::PolicyRequirement(format!(
                "Signature for identity {signed_docker_reference} is not accepted"
            )));
        }
        Ok(())
    }

    fn validate_signed_docker_manifest_digest(&mut self, signed_digest: &Digest) -> Result<()> {
        let (manifest, _) = self.image.manifest()?;
        if !manifest_matches_digest(&manifest, signed_digest)? {
            return Err(Error::PolicyRequirement(format!(
                "Signature for digest {signed_digest} does not match"
            )));
        }
        Ok(())
    }
}

fn verification_cache(
    pr: &PrSignedBy,
    caches: &VerificationCaches,
) -> Result<std::sync::Arc<VerificationCache>> {
    match (&pr.key_path, &pr.key_data) {
        (Some(key_path), None) => caches.for_key_path(key_path),
        (None, Some(key_data)) => caches.for_key_data(key_data),
        (None, None) => Err(Error::InvalidConfiguration(
            "Neither keyPath or keyData specified.".into(),
        )),
        (Some(_), Some(_)) => Err(Error::InvalidConfiguration(
            "Both keyPath and keyData specified.".into(),
        )),
    }
}

fn verify_signature(
    pr: &PrSignedBy,
    caches: &VerificationCaches,
    image: &dyn UnparsedImage,
    signature: &[u8],
) -> Result<Signature> {
    match pr.key_type {
        KeyType::GpgKeys => {}
        other => {
            return Err(Error::Unimplemented(format!(
                "Unimplemented \"keyType\" value \"{other}\""
            )))
        }
    }

    let cache = verification_cache(pr, caches)?;
    // An empty trust set must never accept anything.
    if cache.trusted_identities().is_empty() {
        return Err(Error::PolicyRequirement("No public keys imported".into()));
    }

    let mut rules = SignedByRules {
        trusted_identities: cache.trusted_identities(),
        signed_identity: &pr.signed_identity,
        image,
    };
    let mech = cache.mechanism()?;
    verify_and_extract_signature(mech.as_ref(), signature, &mut rules)
}

pub(crate) fn is_signature_author_accepted(
    pr: &PrSignedBy,
    caches: &VerificationCaches,
    image: &dyn UnparsedImage,
    signature: &[u8],
) -> SignatureAcceptanceResult {
    match verify_signature(pr, caches, image, signature) {
        Ok(signature) => SignatureAcceptanceResult::Accepted(signature),
        Err(e) => SignatureAcceptanceResult::Rejected(e),
    }
}

pub(crate) fn is_running_image_allowed(
    pr: &PrSignedBy,
    caches: &VerificationCaches,
    image: &dyn UnparsedImage,
) -> Result<()> {
    let signatures = image.signatures()?;
    any_signature_accepted(
        signatures
            .iter()
            .map(|signature| is_signature_author_accepted(pr, caches, image, signature)),
    )
}

/// Allows the image as soon as one signature is accepted. Otherwise returns
/// all the rejection reasons: verbatim for a single signature, joined for
/// several.
fn any_signature_accepted(
    results: impl Iterator<Item = SignatureAcceptanceResult>,
) -> Result<()> {
    let mut rejections = Vec::new();
    for (i, result) in results.enumerate() {
        let reason = match result {
            SignatureAcceptanceResult::Accepted(_) => {
                debug!("Signature {i} accepted");
                return Ok(());
            }
            SignatureAcceptanceResult::Rejected(e) => e,
            SignatureAcceptanceResult::Unknown => {
                Error::Internal("Unexpected signature verification result \"unknown\"".into())
            }
        };
        debug!("Signature {i} rejected: {reason}");
        rejections.push(reason);
    }

    let mut rejections = rejections.into_iter();
    match (rejections.next(), rejections.len()) {
        (None, _) => Err(Error::PolicyRequirement(
            "A signature was required, but no signature exists".into(),
        )),
        (Some(reason), 0) => Err(reason),
        (Some(first), _) => {
            let reasons = std::iter::once(first)
                .chain(rejections)
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            Err(Error::PolicyRequirement(format!(
                "None of the signatures were accepted, reasons: {reasons}"
            )))
        }
    }
}
