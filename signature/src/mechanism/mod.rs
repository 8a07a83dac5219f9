// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Cryptographic backends used to sign and verify simple signing payloads.

use crate::Result;

pub mod sequoia;

pub use self::sequoia::SequoiaMechanism;

/// A handle to a set of keys which can verify, and possibly create,
/// signatures over arbitrary byte strings.
///
/// Implementations are not required to be usable from several threads at
/// once; callers sharing one mechanism serialize access to it.
pub trait SigningMechanism: Send {
    /// Releases resources held by the mechanism. It must not be used afterwards.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Returns `Ok(())` if the mechanism is able to create signatures, or
    /// [`crate::Error::SigningNotSupported`] with the reason it can't.
    fn supports_signing(&self) -> Result<()>;

    /// Signs `input` with the key identified by `key_identity`.
    fn sign(&self, input: &[u8], key_identity: &str) -> Result<Vec<u8>>;

    /// Verifies the signature envelope and returns the signed contents
    /// together with the identity of the key that made the signature.
    fn verify(&self, unverified_signature: &[u8]) -> Result<(Vec<u8>, String)>;

    /// Returns the contents and a short key identifier of a signature
    /// WITHOUT verifying it.
    ///
    /// WARNING: nothing returned here can be trusted. It is only meant for
    /// diagnosing verification failures.
    fn untrusted_signature_contents(&self, untrusted_signature: &[u8]) -> Result<(Vec<u8>, String)>;

    /// Returns the passphrase-aware view of this mechanism, if it has one.
    fn as_passphrase_signer(&self) -> Option<&dyn SigningMechanismWithPassphrase> {
        None
    }
}

/// A [`SigningMechanism`] whose secret keys may be protected by a passphrase.
pub trait SigningMechanismWithPassphrase: SigningMechanism {
    /// Signs `input` with the key identified by `key_identity`, unlocking it
    /// with `passphrase` if it is protected.
    fn sign_with_passphrase(&self, input: &[u8], key_identity: &str, passphrase: &str)
        -> Result<Vec<u8>>;
}

/// Creates the ephemeral mechanisms used for policy evaluation.
pub trait MechanismFactory: Send + Sync {
    /// Returns a mechanism which trusts exactly the keys in `key_data`, and
    /// the identities of the keys it imported.
    fn new_ephemeral(&self, key_data: &[u8]) -> Result<(Box<dyn SigningMechanism>, Vec<String>)>;
}

/// The default [`MechanismFactory`], backed by [`SequoiaMechanism`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SequoiaMechanismFactory;

impl MechanismFactory for SequoiaMechanismFactory {
    fn new_ephemeral(&self, key_data: &[u8]) -> Result<(Box<dyn SigningMechanism>, Vec<String>)> {
        let (mech, identities) = SequoiaMechanism::new_ephemeral(&[key_data])?;
        Ok((Box::new(mech), identities))
    }
}

/// Returns a mechanism which only trusts the keys in `blob`, along with the
/// identities of those keys.
pub fn new_ephemeral_mechanism(blob: &[u8]) -> Result<(Box<dyn SigningMechanism>, Vec<String>)> {
    SequoiaMechanismFactory.new_ephemeral(blob)
}
