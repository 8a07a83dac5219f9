// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! OpenPGP signing mechanism implemented with sequoia-openpgp.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::anyhow;
use log::debug;
use openpgp::cert::{Cert, CertParser};
use openpgp::crypto::Password;
use openpgp::parse::stream::{
    GoodChecksum, MessageLayer, MessageStructure, VerificationHelper, VerifierBuilder,
};
use openpgp::parse::Parse;
use openpgp::policy::StandardPolicy;
use openpgp::serialize::stream::{LiteralWriter, Message, Signer};
use openpgp::{KeyHandle, KeyID, Packet, PacketPile};
use sequoia_openpgp as openpgp;

use super::{SigningMechanism, SigningMechanismWithPassphrase};
use crate::{Error, Result};

/// An OpenPGP mechanism holding its keys in memory.
///
/// Only the certificates it was created with, or imported later, are trusted
/// when verifying.
#[derive(Clone, Debug, Default)]
pub struct SequoiaMechanism {
    certs: Vec<Cert>,
}

impl SequoiaMechanism {
    /// Creates a mechanism which trusts only the public keys contained in
    /// `blobs`, and returns the fingerprints of the imported keys.
    ///
    /// Secret key material in the blobs is discarded.
    pub fn new_ephemeral(blobs: &[&[u8]]) -> Result<(Self, Vec<String>)> {
        let mut mech = SequoiaMechanism::default();
        let mut identities = Vec::new();
        for blob in blobs {
            identities.extend(mech.import_keys(blob)?);
        }
        Ok((mech, identities))
    }

    /// Creates a mechanism from a key-ring directory: every regular file in
    /// `dir` is read as a sequence of OpenPGP certificates, secret keys
    /// included, so that the mechanism can sign.
    pub fn from_directory(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir).map_err(|e| {
            Error::resource(format!("reading key ring directory {}", dir.display()), e)
        })?;

        let mut certs = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| Error::resource(format!("reading {}", dir.display()), e))?
                .path();
            if !path.is_file() {
                continue;
            }
            let data = fs::read(&path)
                .map_err(|e| Error::resource(format!("reading key file {}", path.display()), e))?;
            certs.extend(parse_certs(&data)?);
        }

        debug!("Loaded {} certificates from {}", certs.len(), dir.display());
        Ok(SequoiaMechanism { certs })
    }

    /// Adds the public keys in `blob` to the trusted set and returns their
    /// fingerprints. An empty blob imports nothing.
    pub fn import_keys(&mut self, blob: &[u8]) -> Result<Vec<String>> {
        if blob.is_empty() {
            return Ok(Vec::new());
        }

        let mut identities = Vec::new();
        for cert in parse_certs(blob)? {
            let cert = cert.strip_secret_key_material();
            identities.push(cert.fingerprint().to_hex());
            self.certs.push(cert);
        }
        Ok(identities)
    }

    fn find_cert(&self, key_identity: &str) -> Option<&Cert> {
        self.certs
            .iter()
            .find(|cert| cert.fingerprint().to_hex().eq_ignore_ascii_case(key_identity))
    }

    fn sign_impl(&self, input: &[u8], key_identity: &str, passphrase: &str) -> Result<Vec<u8>> {
        let cert = self.find_cert(key_identity).ok_or_else(|| Error::Signing {
            source: anyhow!("key {key_identity} not found"),
        })?;

        let policy = StandardPolicy::new();
        let mut key = cert
            .keys()
            .with_policy(&policy, None)
            .supported()
            .alive()
            .revoked(false)
            .for_signing()
            .secret()
            .next()
            .ok_or_else(|| Error::Signing {
                source: anyhow!("key {key_identity} has no usable secret signing key"),
            })?
            .key()
            .clone();

        if !key.has_unencrypted_secret() {
            key = key
                .decrypt_secret(&Password::from(passphrase))
                .map_err(|source| Error::Signing { source })?;
        }
        let keypair = key
            .into_keypair()
            .map_err(|source| Error::Signing { source })?;

        let mut sink = Vec::new();
        let message = Message::new(&mut sink);
        let signer = Signer::new(message, keypair)
            .and_then(|signer| signer.build())
            .map_err(|source| Error::Signing { source })?;
        let mut literal = LiteralWriter::new(signer)
            .build()
            .map_err(|source| Error::Signing { source })?;
        literal
            .write_all(input)
            .map_err(|e| Error::Signing { source: e.into() })?;
        literal
            .finalize()
            .map_err(|source| Error::Signing { source })?;

        Ok(sink)
    }
}

fn parse_certs(data: &[u8]) -> Result<Vec<Cert>> {
    CertParser::from_bytes(data)
        .and_then(|parser| parser.collect::<openpgp::Result<Vec<Cert>>>())
        .map_err(|e| Error::resource("importing OpenPGP keys", e))
}

// Collects the fingerprint of the certificate which made the first good
// signature of the message.
struct Helper<'a> {
    certs: &'a [Cert],
    signer: Option<String>,
}

impl VerificationHelper for Helper<'_> {
    fn get_certs(&mut self, _ids: &[KeyHandle]) -> openpgp::Result<Vec<Cert>> {
        Ok(self.certs.to_vec())
    }

    fn check(&mut self, structure: MessageStructure) -> openpgp::Result<()> {
        for layer in structure.into_iter() {
            match layer {
                MessageLayer::Compression { .. } => {}
                MessageLayer::SignatureGroup { results } => {
                    let mut errors = Vec::new();
                    for result in results {
                        match result {
                            Ok(GoodChecksum { ka, .. }) => {
                                self.signer = Some(ka.cert().fingerprint().to_hex());
                                return Ok(());
                            }
                            Err(e) => errors.push(e.to_string()),
                        }
                    }
                    return Err(anyhow!("no valid signature: {}", errors.join("; ")));
                }
                _ => return Err(anyhow!("unexpected message structure")),
            }
        }
        Err(anyhow!("no signature found"))
    }
}

impl SigningMechanism for SequoiaMechanism {
    fn close(&mut self) -> Result<()> {
        self.certs.clear();
        Ok(())
    }

    fn supports_signing(&self) -> Result<()> {
        Ok(())
    }

    fn sign(&self, input: &[u8], key_identity: &str) -> Result<Vec<u8>> {
        self.sign_impl(input, key_identity, "")
    }

    fn verify(&self, unverified_signature: &[u8]) -> Result<(Vec<u8>, String)> {
        let policy = StandardPolicy::new();
        let helper = Helper {
            certs: &self.certs,
            signer: None,
        };

        let mut verifier = VerifierBuilder::from_bytes(unverified_signature)
            .and_then(|builder| builder.with_policy(&policy, None, helper))
            .map_err(|source| Error::CryptographicVerification { source })?;

        let mut contents = Vec::new();
        verifier
            .read_to_end(&mut contents)
            .map_err(|e| Error::CryptographicVerification { source: e.into() })?;

        match verifier.into_helper().signer {
            Some(key_identity) => Ok((contents, key_identity)),
            None => Err(Error::CryptographicVerification {
                source: anyhow!("no valid signature found"),
            }),
        }
    }

    fn untrusted_signature_contents(&self, untrusted_signature: &[u8]) -> Result<(Vec<u8>, String)> {
        let pile = PacketPile::from_bytes(untrusted_signature)
            .map_err(|e| Error::InvalidSignature(e.to_string()))?;

        let mut contents = None;
        let mut short_key_identifier = None;
        for packet in pile.descendants() {
            match packet {
                Packet::Literal(literal) if contents.is_none() => {
                    contents = Some(literal.body().to_vec());
                }
                Packet::Signature(signature) if short_key_identifier.is_none() => {
                    short_key_identifier = signature
                        .get_issuers()
                        .first()
                        .map(|issuer| KeyID::from(issuer).to_hex());
                }
                _ => {}
            }
        }

        let contents = contents
            .ok_or_else(|| Error::InvalidSignature("no literal data packet found".into()))?;
        Ok((contents, short_key_identifier.unwrap_or_default()))
    }

    fn as_passphrase_signer(&self) -> Option<&dyn SigningMechanismWithPassphrase> {
        Some(self)
    }
}

impl SigningMechanismWithPassphrase for SequoiaMechanism {
    fn sign_with_passphrase(
        &self,
        input: &[u8],
        key_identity: &str,
        passphrase: &str,
    ) -> Result<Vec<u8>> {
        self.sign_impl(input, key_identity, passphrase)
    }
}
