// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use strum::{Display, EnumString};

use crate::reference::Reference;
use crate::Result;

#[derive(EnumString, Display, Debug, PartialEq)]
pub enum TransportName {
    #[strum(to_string = "docker")]
    Docker,
    #[strum(to_string = "dir")]
    Dir,
}

/// The view of an image that policy evaluation needs: its identity, its
/// manifest and the detached signatures attached to it.
///
/// How the manifest and the signatures were fetched is up to the
/// implementation.
pub trait UnparsedImage {
    /// The identity the image was referred to by, if the transport has one.
    fn docker_reference(&self) -> Option<&Reference>;

    /// Name of the transport the image comes from, used to select policy scopes.
    fn transport_name(&self) -> String {
        TransportName::Docker.to_string()
    }

    /// Returns the raw manifest bytes and their MIME type.
    fn manifest(&self) -> Result<(Vec<u8>, String)>;

    /// Returns the raw signature blobs, in the order the source lists them.
    fn signatures(&self) -> Result<Vec<Vec<u8>>>;
}

/// An image whose manifest and signatures are already held in memory.
#[derive(Clone, Debug)]
pub struct Image {
    pub reference: Option<Reference>,
    manifest: Vec<u8>,
    manifest_mime_type: String,
    signatures: Vec<Vec<u8>>,
}

impl Image {
    pub fn new(reference: Option<Reference>, manifest: Vec<u8>, signatures: Vec<Vec<u8>>) -> Self {
        Image {
            reference,
            manifest,
            manifest_mime_type: String::new(),
            signatures,
        }
    }

    pub fn with_manifest_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.manifest_mime_type = mime_type.into();
        self
    }

    pub fn add_signature(&mut self, signature: Vec<u8>) {
        self.signatures.push(signature);
    }
}

impl UnparsedImage for Image {
    fn docker_reference(&self) -> Option<&Reference> {
        self.reference.as_ref()
    }

    fn manifest(&self) -> Result<(Vec<u8>, String)> {
        Ok((self.manifest.clone(), self.manifest_mime_type.clone()))
    }

    fn signatures(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self.signatures.clone())
    }
}

/// Returns the policy scope of the image itself: the full reference, which is
/// looked up before any of the repository namespaces.
pub fn get_image_scope(image: &dyn UnparsedImage) -> Option<String> {
    image.docker_reference().map(|r| r.to_string())
}

/// Returns the list of other policy configuration namespaces to search.
pub fn get_image_namespaces(image: &dyn UnparsedImage) -> Vec<String> {
    image
        .docker_reference()
        .map(Reference::namespaces)
        .unwrap_or_default()
}
