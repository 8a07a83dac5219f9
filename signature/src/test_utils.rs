// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! In-memory signing mechanisms for unit tests.
//!
//! A fake signature is `key identity`, a newline, then the signed contents.
//! Verification succeeds if the key identity is one of the trusted keys.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::anyhow;

use crate::mechanism::{MechanismFactory, SigningMechanism, SigningMechanismWithPassphrase};
use crate::{Error, Result};

pub(crate) struct FakeMechanism {
    keys: Vec<String>,
    passphrase: Option<String>,
    closed: Option<Arc<AtomicUsize>>,
}

impl FakeMechanism {
    pub(crate) fn new(keys: &[&str]) -> Self {
        FakeMechanism {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            passphrase: None,
            closed: None,
        }
    }

    pub(crate) fn with_passphrase(mut self, passphrase: &str) -> Self {
        self.passphrase = Some(passphrase.to_string());
        self
    }

    fn split(signature: &[u8]) -> Result<(Vec<u8>, String)> {
        let pos = signature
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| Error::CryptographicVerification {
                source: anyhow!("malformed signature"),
            })?;
        let key = String::from_utf8_lossy(&signature[..pos]).into_owned();
        Ok((signature[pos + 1..].to_vec(), key))
    }
}

impl SigningMechanism for FakeMechanism {
    fn close(&mut self) -> Result<()> {
        if let Some(closed) = &self.closed {
            closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn supports_signing(&self) -> Result<()> {
        Ok(())
    }

    fn sign(&self, input: &[u8], key_identity: &str) -> Result<Vec<u8>> {
        if self.passphrase.is_some() {
            return Err(Error::Signing {
                source: anyhow!("key is protected"),
            });
        }
        if !self.keys.iter().any(|k| k == key_identity) {
            return Err(Error::Signing {
                source: anyhow!("unknown key {key_identity}"),
            });
        }
        let mut signature = format!("{key_identity}\n").into_bytes();
        signature.extend_from_slice(input);
        Ok(signature)
    }

    fn verify(&self, unverified_signature: &[u8]) -> Result<(Vec<u8>, String)> {
        let (contents, key) = Self::split(unverified_signature)?;
        if !self.keys.contains(&key) {
            return Err(Error::CryptographicVerification {
                source: anyhow!("signature by unknown key {key}"),
            });
        }
        Ok((contents, key))
    }

    fn untrusted_signature_contents(&self, untrusted_signature: &[u8]) -> Result<(Vec<u8>, String)> {
        Self::split(untrusted_signature)
    }

    fn as_passphrase_signer(&self) -> Option<&dyn SigningMechanismWithPassphrase> {
        match self.passphrase {
            Some(_) => Some(self),
            None => None,
        }
    }
}

impl SigningMechanismWithPassphrase for FakeMechanism {
    fn sign_with_passphrase(
        &self,
        input: &[u8],
        key_identity: &str,
        passphrase: &str,
    ) -> Result<Vec<u8>> {
        if self.passphrase.as_deref() != Some(passphrase) {
            return Err(Error::Signing {
                source: anyhow!("bad passphrase"),
            });
        }
        let unlocked = FakeMechanism {
            keys: self.keys.clone(),
            passphrase: None,
            closed: None,
        };
        unlocked.sign(input, key_identity)
    }
}

/// Builds [`FakeMechanism`]s from key data listing one key identity per
/// line, and counts how many were created and closed.
#[derive(Clone, Default)]
pub(crate) struct FakeMechanismFactory {
    pub(crate) created: Arc<AtomicUsize>,
    pub(crate) closed: Arc<AtomicUsize>,
}

impl FakeMechanismFactory {
    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub(crate) fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl MechanismFactory for FakeMechanismFactory {
    fn new_ephemeral(&self, key_data: &[u8]) -> Result<(Box<dyn SigningMechanism>, Vec<String>)> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let data = std::str::from_utf8(key_data)
            .map_err(|e| Error::resource("importing keys", e))?;
        let keys: Vec<&str> = data.lines().filter(|l| !l.is_empty()).collect();
        let mut mech = FakeMechanism::new(&keys);
        mech.closed = Some(self.closed.clone());
        let identities = mech.keys.clone();
        Ok((Box::new(mech), identities))
    }
}
