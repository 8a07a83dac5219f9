// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::path::Path;

use base64::Engine;
use image_signature::{Image, Reference, SimpleSignerBuilder};
use sequoia_openpgp::cert::{Cert, CertBuilder};
use sequoia_openpgp::serialize::SerializeInto;

pub const MANIFEST: &[u8] = br#"{
    "schemaVersion": 2,
    "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
    "config": {
        "mediaType": "application/vnd.docker.container.image.v1+json",
        "size": 1472,
        "digest": "sha256:0ffbb70d3ea0ee0a9b4c2ab4e51cf0ab9f3e2d0d0ab7aa1ac6a5ad0a2cbbde7d"
    },
    "layers": []
}"#;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A generated OpenPGP key pair.
pub struct TestKey {
    pub cert: Cert,
    pub passphrase: Option<String>,
}

impl TestKey {
    pub fn generate(passphrase: Option<&str>) -> Self {
        let mut builder = CertBuilder::new()
            .add_userid("signer@example.org")
            .add_signing_subkey();
        if let Some(passphrase) = passphrase {
            builder = builder.set_password(Some(passphrase.into()));
        }
        let (cert, _) = builder.generate().unwrap();
        TestKey {
            cert,
            passphrase: passphrase.map(str::to_string),
        }
    }

    pub fn fingerprint(&self) -> String {
        self.cert.fingerprint().to_hex()
    }

    pub fn public_key(&self) -> Vec<u8> {
        self.cert.to_vec().unwrap()
    }

    pub fn public_key_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.public_key())
    }

    /// Writes the secret key into a key-ring directory.
    pub fn write_key_ring(&self, dir: &Path) {
        std::fs::write(
            dir.join(format!("{}.pgp", self.fingerprint())),
            self.cert.as_tsk().to_vec().unwrap(),
        )
        .unwrap();
    }

    pub fn sign(&self, manifest: &[u8], reference: &str) -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();
        self.write_key_ring(dir.path());

        let mut builder = SimpleSignerBuilder::new()
            .with_home_directory(dir.path())
            .with_key_fingerprint(self.fingerprint());
        if let Some(passphrase) = &self.passphrase {
            builder = builder.with_passphrase(passphrase.clone());
        }
        let signer = builder.build().unwrap();
        let signature = signer
            .sign_image_manifest(manifest, &Reference::try_from(reference).unwrap())
            .unwrap();
        signer.close().unwrap();
        signature
    }
}

pub fn image(reference: &str, signatures: Vec<Vec<u8>>) -> Image {
    Image::new(
        Some(Reference::try_from(reference).unwrap()),
        MANIFEST.to_vec(),
        signatures,
    )
}
