// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Evaluation of a [`Policy`] against images.

use std::sync::Arc;

use log::{debug, info, warn};

use super::policy_requirement::SignatureAcceptanceResult;
use super::verification_cache::VerificationCaches;
use super::Policy;
use crate::image::UnparsedImage;
use crate::mechanism::{MechanismFactory, SequoiaMechanismFactory};
use crate::payload::simple_signing::Signature;
use crate::{Error, Result};

/// A policy together with the verification resources its requirements
/// create while images are evaluated.
///
/// Mechanisms are created lazily, once per distinct key source, and live
/// until the context is destroyed or dropped.
pub struct PolicyContext {
    policy: Policy,
    caches: VerificationCaches,
}

enum SignatureState {
    Unknown,
    Accepted(Signature),
    Rejected,
}

impl PolicyContext {
    pub fn new(policy: Policy) -> Self {
        Self::with_mechanism_factory(policy, Arc::new(SequoiaMechanismFactory))
    }

    /// Creates a context whose key sources are imported by `factory`.
    pub fn with_mechanism_factory(policy: Policy, factory: Arc<dyn MechanismFactory>) -> Self {
        PolicyContext {
            policy,
            caches: VerificationCaches::new(factory),
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Returns Ok(()) if every requirement that applies to the image allows
    /// running it.
    ///
    /// WARNING: This validates signatures and the manifest, but does not
    /// validate the layers. Callers must check that the layers match the
    /// digests listed in the manifest.
    pub fn is_running_image_allowed(&self, image: &dyn UnparsedImage) -> Result<()> {
        let reqs = self.policy.requirements_for_image(image);
        if reqs.is_empty() {
            return Err(Error::PolicyRequirement(
                "List of verification policy requirements must not be empty".into(),
            ));
        }

        for (i, req) in reqs.iter().enumerate() {
            debug!("Evaluating requirement {i}: {req:?}");
            req.is_running_image_allowed(&self.caches, image)?;
        }

        info!(
            "Image {} is allowed by policy",
            image
                .docker_reference()
                .map(|r| r.to_string())
                .unwrap_or_default()
        );
        Ok(())
    }

    /// Returns the signatures of the image whose author is accepted by at
    /// least one requirement and rejected by none.
    pub fn signatures_with_accepted_author(
        &self,
        image: &dyn UnparsedImage,
    ) -> Result<Vec<Signature>> {
        let reqs = self.policy.requirements_for_image(image);
        let mut accepted = Vec::new();

        for (i, signature) in image.signatures()?.iter().enumerate() {
            let mut state = SignatureState::Unknown;
            for req in reqs {
                match req.is_signature_author_accepted(&self.caches, image, signature) {
                    SignatureAcceptanceResult::Accepted(sig) => match &state {
                        SignatureState::Unknown => state = SignatureState::Accepted(sig),
                        SignatureState::Accepted(previous) if *previous != sig => {
                            warn!("Signature {i} accepted with different contents, rejecting it");
                            state = SignatureState::Rejected;
                        }
                        _ => {}
                    },
                    SignatureAcceptanceResult::Rejected(e) => {
                        debug!("Signature {i} rejected: {e}");
                        state = SignatureState::Rejected;
                    }
                    SignatureAcceptanceResult::Unknown => {}
                }
                if matches!(state, SignatureState::Rejected) {
                    break;
                }
            }

            if let SignatureState::Accepted(sig) = state {
                debug!("Signature {i} accepted");
                accepted.push(sig);
            }
        }

        Ok(accepted)
    }

    /// Releases every cached mechanism. Returns the first close error.
    pub fn destroy(self) -> Result<()> {
        self.caches.close_all()
    }
}

impl Drop for PolicyContext {
    fn drop(&mut self) {
        if let Err(e) = self.caches.close_all() {
            warn!("Failed to release policy context: {e}");
        }
    }
}
