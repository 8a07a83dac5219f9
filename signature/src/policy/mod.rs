// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::image::{self, TransportName, UnparsedImage};
use crate::reference::{is_valid_domain, is_valid_full_name, Reference};
use crate::{Error, Result};

mod context;
mod policy_requirement;
mod ref_match;
mod signed_by;
mod verification_cache;

pub use context::PolicyContext;
pub use policy_requirement::{
    KeyType, PolicyRequirement, PrSignedBaseLayer, PrSignedBy, SignatureAcceptanceResult,
};
pub use ref_match::PolicyReqMatchType;

// Policy defines requirements for considering a signature, or an image, valid.
// The format is described in https://github.com/containers/image/blob/main/docs/containers-policy.json.5.md
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Policy {
    // `default` applies to any image which does not have a matching policy in `transports`.
    // Note that this can happen even if a matching `PolicyTransportScopes` exists in `transports`.
    pub default: Vec<PolicyRequirement>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub transports: HashMap<String, PolicyTransportScopes>,
}

pub type PolicyTransportScopes = HashMap<String, Vec<PolicyRequirement>>;

impl Policy {
    /// Parses and validates a policy document.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let policy: Policy = serde_json::from_slice(data)
            .map_err(|e| Error::InvalidConfiguration(format!("parsing policy: {e}")))?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        for req in &self.default {
            req.validate()?;
        }

        for (transport, scopes) in &self.transports {
            let transport_name = TransportName::from_str(transport).map_err(|_| {
                Error::InvalidConfiguration(format!("Unknown transport \"{transport}\""))
            })?;
            for (scope, reqs) in scopes {
                if transport_name == TransportName::Docker {
                    validate_docker_scope(scope)?;
                }
                for req in reqs {
                    req.validate()?;
                }
            }
        }

        Ok(())
    }

    // Selects the appropriate requirements for the image.
    pub(crate) fn requirements_for_image(&self, image: &dyn UnparsedImage) -> &[PolicyRequirement] {
        let transport_name = image.transport_name();

        if let Some(transport_scopes) = self.transports.get(&transport_name) {
            // Look for a full match.
            if let Some(reqs) = image::get_image_scope(image).and_then(|s| transport_scopes.get(&s)) {
                return reqs;
            }

            // Look for a match of the possible parent namespaces.
            for name in image::get_image_namespaces(image).iter() {
                if let Some(reqs) = transport_scopes.get(name) {
                    return reqs;
                }
            }

            // Look for a default match for the transport.
            if let Some(reqs) = transport_scopes.get("") {
                return reqs;
            }
        }

        &self.default
    }
}

fn validate_docker_scope(scope: &str) -> Result<()> {
    if scope.is_empty() {
        return Ok(());
    }

    let valid = match scope.strip_prefix("*.") {
        Some(domain) => is_valid_domain(domain),
        None => {
            is_valid_domain(scope)
                || is_valid_full_name(scope)
                || Reference::parse_named(scope).is_ok_and(|r| r.to_string() == scope)
        }
    };

    if !valid {
        return Err(Error::InvalidConfiguration(format!(
            "Invalid policy scope \"{scope}\" for transport docker"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::image::Image;

    const POLICY: &str = r#"{
        "default": [{"type": "reject"}],
        "transports": {
            "docker": {
                "": [{"type": "insecureAcceptAnything"}],
                "quay.io/ns/repo:v1": [{"type": "reject"}, {"type": "insecureAcceptAnything"}],
                "quay.io/ns": [
                    {
                        "type": "signedBy",
                        "keyType": "GPGKeys",
                        "keyPath": "/etc/pki/keys.gpg"
                    }
                ],
                "*.example.com": [
                    {
                        "type": "signedBy",
                        "keyType": "GPGKeys",
                        "keyData": "a2V5LTE=",
                        "signedIdentity": {"type": "matchRepository"}
                    }
                ],
                "docker.io/library/busybox": [{"type": "signedBaseLayer", "baseLayerIdentity": {"type": "matchExact"}}]
            }
        }
    }"#;

    fn image(reference: &str) -> Image {
        Image::new(Some(Reference::try_from(reference).unwrap()), Vec::new(), Vec::new())
    }

    fn types(reqs: &[PolicyRequirement]) -> Vec<&'static str> {
        reqs.iter()
            .map(|req| match req {
                PolicyRequirement::InsecureAcceptAnything => "insecureAcceptAnything",
                PolicyRequirement::Reject => "reject",
                PolicyRequirement::SignedBy(_) => "signedBy",
                PolicyRequirement::SignedBaseLayer(_) => "signedBaseLayer",
            })
            .collect()
    }

    #[rstest]
    #[case::full_reference("quay.io/ns/repo:v1", vec!["reject", "insecureAcceptAnything"])]
    #[case::namespace("quay.io/ns/repo:v2", vec!["signedBy"])]
    #[case::wildcard_domain("registry.example.com/a/b:1", vec!["signedBy"])]
    #[case::normalized_name("busybox", vec!["signedBaseLayer"])]
    #[case::transport_default("ghcr.io/a/b:1", vec!["insecureAcceptAnything"])]
    fn requirements_for_image(#[case] reference: &str, #[case] expected: Vec<&str>) {
        let policy = Policy::from_slice(POLICY.as_bytes()).unwrap();
        assert_eq!(types(policy.requirements_for_image(&image(reference))), expected);
    }

    #[test]
    fn default_requirements() {
        let policy = Policy::from_slice(br#"{"default": [{"type": "reject"}]}"#).unwrap();
        assert_eq!(types(policy.requirements_for_image(&image("busybox"))), vec!["reject"]);
        assert_eq!(
            types(policy.requirements_for_image(&Image::new(None, Vec::new(), Vec::new()))),
            vec!["reject"]
        );
    }

    #[test]
    fn parse_policy() {
        let policy = Policy::from_slice(POLICY.as_bytes()).unwrap();
        let scopes = &policy.transports["docker"];
        assert_eq!(scopes.len(), 5);
        match &scopes["*.example.com"][0] {
            PolicyRequirement::SignedBy(pr) => {
                assert_eq!(pr.key_type, KeyType::GpgKeys);
                assert_eq!(pr.key_data.as_deref(), Some(b"key-1".as_slice()));
                assert_eq!(pr.signed_identity, PolicyReqMatchType::MatchRepository);
            }
            other => panic!("unexpected requirement {other:?}"),
        }
    }

    #[rstest]
    #[case::not_json("{")]
    #[case::missing_default(r#"{"transports": {}}"#)]
    #[case::unknown_field(r#"{"default": [], "unknown": 1}"#)]
    #[case::unknown_transport(r#"{"default": [], "transports": {"ftp": {}}}"#)]
    #[case::invalid_scope(r#"{"default": [], "transports": {"docker": {"Quay.io/NS": []}}}"#)]
    #[case::invalid_wildcard(r#"{"default": [], "transports": {"docker": {"*.": []}}}"#)]
    #[case::non_canonical_scope(r#"{"default": [], "transports": {"docker": {"busybox:latest": []}}}"#)]
    #[case::invalid_requirement(r#"{"default": [{"type": "signedBy", "keyType": "GPGKeys"}]}"#)]
    #[case::invalid_scoped_requirement(
        r#"{"default": [], "transports": {"docker": {"": [{"type": "signedBy", "keyType": "GPGKeys"}]}}}"#
    )]
    #[case::reject_with_unknown_field(r#"{"default": [{"type": "reject", "bogus": 1}]}"#)]
    #[case::insecure_with_unknown_field(
        r#"{"default": [{"type": "insecureAcceptAnything", "keyPath": "/k"}]}"#
    )]
    #[case::match_exact_with_unknown_field(
        r#"{"default": [{"type": "signedBy", "keyType": "GPGKeys", "keyPath": "/k", "signedIdentity": {"type": "matchExact", "dockerReference": "quay.io/a/b:1"}}]}"#
    )]
    #[case::scoped_reject_with_unknown_field(
        r#"{"default": [], "transports": {"docker": {"quay.io": [{"type": "reject", "bogus": 1}]}}}"#
    )]
    fn reject_invalid_policy(#[case] json: &str) {
        let err = Policy::from_slice(json.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)), "{err}");
    }

    #[rstest]
    #[case("")]
    #[case("docker.io")]
    #[case("*.docker.io")]
    #[case("localhost:5000")]
    #[case("docker.io/library/busybox")]
    #[case("docker.io/library/busybox:latest")]
    #[case("docker.io/library/busybox@sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")]
    fn valid_docker_scopes(#[case] scope: &str) {
        assert!(validate_docker_scope(scope).is_ok());
    }
}
