// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! # Overall
//! Signature trust policy evaluation for container images.
//!
//! # Interfaces
//! #### Policy
//! A [`Policy`] lists the requirements an image must satisfy, by default
//! and per transport scope. A [`PolicyContext`] evaluates a policy against
//! images and owns the verification mechanisms created on the way.
//!
//! #### Simple signing
//! [`UntrustedSignature`] is the signed payload binding a manifest digest
//! to a docker reference. [`verify_and_extract_signature`] is the only way
//! to turn a signature blob into a verified [`Signature`].
//!
//! #### Signing mechanisms
//! [`SigningMechanism`] abstracts the cryptography. [`SequoiaMechanism`] is
//! the OpenPGP implementation.
//!
//! #### Signer
//! [`SimpleSigner`] creates signatures for image manifests.

pub mod digest;
pub mod docker;
pub mod error;
pub mod image;
pub mod mechanism;
pub mod payload;
pub mod policy;
pub mod reference;
pub mod signer;

#[cfg(test)]
mod test_utils;

pub use digest::Digest;
pub use docker::{
    get_untrusted_signature_information_without_verifying, UntrustedSignatureInformation,
};
pub use error::{Error, Result};
pub use image::{Image, UnparsedImage};
pub use mechanism::{MechanismFactory, SequoiaMechanism, SigningMechanism};
pub use payload::simple_signing::{
    verify_and_extract_signature, Signature, SignatureAcceptanceRules, UntrustedSignature,
};
pub use policy::{Policy, PolicyContext, PolicyRequirement};
pub use reference::Reference;
pub use signer::{SimpleSigner, SimpleSignerBuilder};
