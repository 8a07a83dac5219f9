// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Creating simple signing signatures for image manifests.

use std::path::PathBuf;

use log::{debug, warn};

use crate::digest::manifest_digest;
use crate::mechanism::{SequoiaMechanism, SigningMechanism};
use crate::payload::simple_signing::UntrustedSignature;
use crate::reference::Reference;
use crate::{Error, Result};

/// Optional parameters for signing container images.
#[derive(Clone, Debug, Default)]
pub struct SignOptions {
    /// Passphrase unlocking the key used for signing.
    pub passphrase: Option<String>,
}

fn validate_passphrase(passphrase: &str) -> Result<()> {
    // Agent protocols treat a line break as the end of the passphrase.
    if passphrase.contains('\n') {
        return Err(Error::InvalidConfiguration(
            "invalid passphrase: must not contain a line break".into(),
        ));
    }
    Ok(())
}

/// Returns a signature for `manifest` as `docker_reference`, using `mech`
/// and `key_identity`.
pub fn sign_docker_manifest(
    manifest: &[u8],
    docker_reference: &str,
    mech: &dyn SigningMechanism,
    key_identity: &str,
) -> Result<Vec<u8>> {
    sign_docker_manifest_with_options(manifest, docker_reference, mech, key_identity, None)
}

/// Like [`sign_docker_manifest`], with optional parameters.
pub fn sign_docker_manifest_with_options(
    manifest: &[u8],
    docker_reference: &str,
    mech: &dyn SigningMechanism,
    key_identity: &str,
    options: Option<&SignOptions>,
) -> Result<Vec<u8>> {
    let passphrase = options.and_then(|o| o.passphrase.as_deref());
    if let Some(passphrase) = passphrase {
        validate_passphrase(passphrase)?;
    }

    let digest = manifest_digest(manifest)?;
    UntrustedSignature::new(digest, docker_reference).sign(mech, key_identity, passphrase)
}

/// Builds a [`SimpleSigner`].
///
/// The signing keys come either from a key-ring directory or from an
/// explicitly provided mechanism; there is no default location.
#[derive(Default)]
pub struct SimpleSignerBuilder {
    home_directory: Option<PathBuf>,
    key_fingerprint: Option<String>,
    passphrase: Option<String>,
    mechanism: Option<Box<dyn SigningMechanism>>,
}

impl SimpleSignerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads signing keys from the key-ring directory `dir`.
    pub fn with_home_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.home_directory = Some(dir.into());
        self
    }

    pub fn with_key_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.key_fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Signs with `mechanism` instead of loading a key-ring directory.
    pub fn with_mechanism(mut self, mechanism: Box<dyn SigningMechanism>) -> Self {
        self.mechanism = Some(mechanism);
        self
    }

    pub fn build(self) -> Result<SimpleSigner> {
        if let Some(passphrase) = &self.passphrase {
            validate_passphrase(passphrase)?;
        }
        let key_fingerprint = self.key_fingerprint.ok_or_else(|| {
            Error::InvalidConfiguration("no key identity provided for simple signing".into())
        })?;

        let mut mech = match (self.mechanism, self.home_directory) {
            (Some(mech), _) => mech,
            (None, Some(dir)) => Box::new(SequoiaMechanism::from_directory(&dir)?),
            (None, None) => {
                return Err(Error::InvalidConfiguration(
                    "no signing key ring directory provided".into(),
                ))
            }
        };

        if let Err(e) = mech.supports_signing() {
            if let Err(close_error) = mech.close() {
                warn!("Failed to close signing mechanism: {close_error}");
            }
            return Err(match e {
                Error::SigningNotSupported(_) => e,
                other => Error::SigningNotSupported(other.to_string()),
            });
        }

        debug!("Created simple signer for key {key_fingerprint}");
        Ok(SimpleSigner {
            mech,
            key_fingerprint,
            passphrase: self.passphrase,
        })
    }
}

/// Creates simple signing signatures with one key.
pub struct SimpleSigner {
    mech: Box<dyn SigningMechanism>,
    key_fingerprint: String,
    passphrase: Option<String>,
}

impl SimpleSigner {
    /// A sentence to show before starting to create a single signature.
    pub fn progress_message(&self) -> String {
        "Signing image using simple signing".to_string()
    }

    /// Creates a signature for `manifest` as `docker_reference`.
    ///
    /// The reference must carry a tag or a digest.
    pub fn sign_image_manifest(&self, manifest: &[u8], docker_reference: &Reference) -> Result<Vec<u8>> {
        if docker_reference.is_name_only() {
            return Err(Error::InvalidConfiguration(format!(
                "reference {docker_reference} can't be signed, it has neither a tag nor a digest"
            )));
        }

        let options = SignOptions {
            passphrase: self.passphrase.clone(),
        };
        sign_docker_manifest_with_options(
            manifest,
            &docker_reference.to_string(),
            self.mech.as_ref(),
            &self.key_fingerprint,
            Some(&options),
        )
    }

    pub fn close(mut self) -> Result<()> {
        self.mech.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeMechanism;

    const MANIFEST: &[u8] = br#"{"schemaVersion": 2, "layers": []}"#;

    #[test]
    fn sign_manifest() {
        let mech = FakeMechanism::new(&["key"]);
        let signature = sign_docker_manifest(MANIFEST, "example.com/ns/repo:tag", &mech, "key").unwrap();

        let (contents, key) = mech.verify(&signature).unwrap();
        assert_eq!(key, "key");
        let sig = UntrustedSignature::from_json(&contents).unwrap();
        assert_eq!(sig.untrusted_docker_manifest_digest, manifest_digest(MANIFEST).unwrap());
        assert_eq!(sig.untrusted_docker_reference, "example.com/ns/repo:tag");
    }

    #[test]
    fn sign_manifest_failures() {
        let mech = FakeMechanism::new(&["key"]);
        assert!(sign_docker_manifest(MANIFEST, "", &mech, "key").is_err());
        assert!(sign_docker_manifest(MANIFEST, "example.com/ns/repo:tag", &mech, "other").is_err());

        let schema1 = br#"{"schemaVersion": 1, "signatures": []}"#;
        assert!(matches!(
            sign_docker_manifest(schema1, "example.com/ns/repo:tag", &mech, "key"),
            Err(Error::Unimplemented(_))
        ));

        let options = SignOptions {
            passphrase: Some("pass\nphrase".into()),
        };
        assert!(matches!(
            sign_docker_manifest_with_options(MANIFEST, "a/b:c", &mech, "key", Some(&options)),
            Err(Error::InvalidConfiguration(_))
        ));

        let options = SignOptions {
            passphrase: Some("passphrase".into()),
        };
        assert!(matches!(
            sign_docker_manifest_with_options(MANIFEST, "a/b:c", &mech, "key", Some(&options)),
            Err(Error::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn simple_signer() {
        let signer = SimpleSignerBuilder::new()
            .with_mechanism(Box::new(FakeMechanism::new(&["key"]).with_passphrase("secret")))
            .with_key_fingerprint("key")
            .with_passphrase("secret")
            .build()
            .unwrap();
        assert!(!signer.progress_message().is_empty());

        let name_only = Reference::try_from("example.com/ns/repo").unwrap();
        let err = signer.sign_image_manifest(MANIFEST, &name_only).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid configuration: reference example.com/ns/repo can't be signed, it has neither a tag nor a digest"
        );

        let tagged = Reference::try_from("repo:tag").unwrap();
        let signature = signer.sign_image_manifest(MANIFEST, &tagged).unwrap();
        let verifier = FakeMechanism::new(&["key"]);
        let (contents, _) = verifier.verify(&signature).unwrap();
        let sig = UntrustedSignature::from_json(&contents).unwrap();
        assert_eq!(sig.untrusted_docker_reference, "docker.io/library/repo:tag");

        signer.close().unwrap();
    }

    #[test]
    fn simple_signer_configuration_errors() {
        let no_key = SimpleSignerBuilder::new()
            .with_mechanism(Box::new(FakeMechanism::new(&["key"])))
            .build();
        assert!(matches!(no_key, Err(Error::InvalidConfiguration(_))));

        let no_keyring = SimpleSignerBuilder::new().with_key_fingerprint("key").build();
        assert!(matches!(no_keyring, Err(Error::InvalidConfiguration(_))));

        let bad_passphrase = SimpleSignerBuilder::new()
            .with_mechanism(Box::new(FakeMechanism::new(&["key"])))
            .with_key_fingerprint("key")
            .with_passphrase("a\nb")
            .build();
        assert!(matches!(bad_passphrase, Err(Error::InvalidConfiguration(_))));

        let missing_dir = SimpleSignerBuilder::new()
            .with_home_directory("/nonexistent/key/ring")
            .with_key_fingerprint("key")
            .build();
        assert!(matches!(missing_dir, Err(Error::Resource { .. })));
    }
}
