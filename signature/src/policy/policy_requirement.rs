// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use log::error;
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};
use strum::{Display, EnumString};

use super::ref_match::PolicyReqMatchType;
use super::signed_by;
use super::verification_cache::VerificationCaches;
use crate::image::UnparsedImage;
use crate::payload::simple_signing::Signature;
use crate::{Error, Result};

/// The outcome of checking one signature against one requirement.
#[derive(Debug)]
pub enum SignatureAcceptanceResult {
    /// The signature is valid and acceptable.
    Accepted(Signature),
    /// The signature is not acceptable, for the given reason.
    Rejected(Error),
    /// The requirement does not judge signature authorship at all.
    Unknown,
}

/// A rule which must be satisfied by the image.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase", from = "RequirementConfig")]
pub enum PolicyRequirement {
    /// Accept the image unconditionally.
    InsecureAcceptAnything,

    /// Reject the image unconditionally.
    Reject,

    /// At least one signature of the image must be made by a trusted key.
    SignedBy(PrSignedBy),

    /// The base layer of the image must be signed. Not implemented: it
    /// never allows an image.
    SignedBaseLayer(PrSignedBaseLayer),
}

// `insecureAcceptAnything` and `reject` are empty struct variants here: unit
// variants of an internally tagged enum ignore unknown fields.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", deny_unknown_fields)]
enum RequirementConfig {
    InsecureAcceptAnything {},
    Reject {},
    SignedBy(PrSignedBy),
    SignedBaseLayer(PrSignedBaseLayer),
}

impl From<RequirementConfig> for PolicyRequirement {
    fn from(config: RequirementConfig) -> Self {
        match config {
            RequirementConfig::InsecureAcceptAnything {} => PolicyRequirement::InsecureAcceptAnything,
            RequirementConfig::Reject {} => PolicyRequirement::Reject,
            RequirementConfig::SignedBy(pr) => PolicyRequirement::SignedBy(pr),
            RequirementConfig::SignedBaseLayer(pr) => PolicyRequirement::SignedBaseLayer(pr),
        }
    }
}

#[derive(Deserialize, Serialize, EnumString, Display, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    #[serde(rename = "GPGKeys")]
    #[strum(to_string = "GPGKeys")]
    GpgKeys,
    #[serde(rename = "signedByGPGKeys")]
    #[strum(to_string = "signedByGPGKeys")]
    SignedByGpgKeys,
    #[serde(rename = "X509Certificates")]
    #[strum(to_string = "X509Certificates")]
    X509Certificates,
    #[serde(rename = "signedByX509CAs")]
    #[strum(to_string = "signedByX509CAs")]
    SignedByX509Cas,
}

#[serde_as]
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PrSignedBy {
    // Which kind of keys the signatures are verified with.
    pub key_type: KeyType,

    // A pathname to a local file containing the trusted key(s).
    // Exactly one of KeyPath and KeyData can be specified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,

    // The trusted key(s), base64-encoded in the policy document.
    // Exactly one of KeyPath and KeyData can be specified.
    #[serde_as(as = "Option<Base64>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_data: Option<Vec<u8>>,

    // What image identity the signature must be claiming about the image.
    // Defaults to "matchRepoDigestOrExact" if not specified.
    #[serde(default)]
    pub signed_identity: PolicyReqMatchType,
}

impl PrSignedBy {
    pub fn validate(&self) -> Result<()> {
        match (&self.key_path, &self.key_data) {
            (None, None) => {
                return Err(Error::InvalidConfiguration(
                    "Neither keyPath or keyData specified.".into(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(Error::InvalidConfiguration(
                    "Both keyPath and keyData specified.".into(),
                ))
            }
            _ => {}
        }
        self.signed_identity.validate()
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PrSignedBaseLayer {
    // Which base layers are acceptable.
    pub base_layer_identity: PolicyReqMatchType,
}

/// Name of the image for messages: `transport://reference`.
fn image_name(image: &dyn UnparsedImage) -> String {
    match image.docker_reference() {
        Some(reference) => format!("{}://{}", image.transport_name(), reference),
        None => image.transport_name(),
    }
}

impl PolicyRequirement {
    pub fn validate(&self) -> Result<()> {
        match self {
            PolicyRequirement::InsecureAcceptAnything | PolicyRequirement::Reject => Ok(()),
            PolicyRequirement::SignedBy(pr) => pr.validate(),
            PolicyRequirement::SignedBaseLayer(pr) => pr.base_layer_identity.validate(),
        }
    }

    /// Checks whether `signature` is acceptable as a signature of `image`
    /// made by an author this requirement trusts.
    pub(crate) fn is_signature_author_accepted(
        &self,
        caches: &VerificationCaches,
        image: &dyn UnparsedImage,
        signature: &[u8],
    ) -> SignatureAcceptanceResult {
        match self {
            PolicyRequirement::InsecureAcceptAnything => SignatureAcceptanceResult::Unknown,
            PolicyRequirement::Reject => SignatureAcceptanceResult::Rejected(
                Error::PolicyRequirement(format!(
                    "Any signatures for image {} are rejected by policy.",
                    image_name(image)
                )),
            ),
            PolicyRequirement::SignedBy(pr) => {
                signed_by::is_signature_author_accepted(pr, caches, image, signature)
            }
            PolicyRequirement::SignedBaseLayer(_) => SignatureAcceptanceResult::Unknown,
        }
    }

    /// Returns `Ok(())` if this requirement allows running `image`, or the
    /// reason it does not.
    ///
    /// WARNING: This validates signatures and the manifest, but does not
    /// download or validate the layers. Users must validate that the layers
    /// match their expected digests.
    pub(crate) fn is_running_image_allowed(
        &self,
        caches: &VerificationCaches,
        image: &dyn UnparsedImage,
    ) -> Result<()> {
        match self {
            PolicyRequirement::InsecureAcceptAnything => Ok(()),
            PolicyRequirement::Reject => Err(Error::PolicyRequirement(format!(
                "Running image {} is rejected by policy.",
                image_name(image)
            ))),
            PolicyRequirement::SignedBy(pr) => signed_by::is_running_image_allowed(pr, caches, image),
            PolicyRequirement::SignedBaseLayer(_) => {
                error!("signedBaseLayer not implemented yet!");
                Err(Error::Unimplemented(
                    "signedBaseLayer not implemented yet!".into(),
                ))
            }
        }
    }
}
