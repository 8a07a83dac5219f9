// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use serde::{Deserialize, Serialize};

use crate::reference::{is_valid_domain, Reference};
use crate::{Error, Result};

/// Specifies which image identities a signature may claim, relative to the
/// identity the image was referred to by.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "camelCase", from = "MatchTypeConfig")]
pub enum PolicyReqMatchType {
    /// The two references must match exactly.
    MatchExact,

    /// The two references must match exactly, except that digest references
    /// are also accepted if the repository name matches (regardless of
    /// tag/digest) and the signature applies to the referenced digest.
    #[default]
    MatchRepoDigestOrExact,

    /// The two references must use the same repository, and may differ in
    /// the tag.
    MatchRepository,

    /// Matches a specific identity, regardless of the one the image was
    /// referred to by.
    #[serde(rename_all = "camelCase")]
    ExactReference { docker_reference: String },

    /// Matches a specific repository, regardless of the identity the image
    /// was referred to by.
    #[serde(rename_all = "camelCase")]
    ExactRepository { docker_repository: String },

    /// Like `matchRepoDigestOrExact`, except that an image reference
    /// starting with `prefix` is rewritten to start with `signedPrefix`
    /// before matching.
    #[serde(rename_all = "camelCase")]
    RemapIdentity {
        prefix: String,
        signed_prefix: String,
    },
}

// The parameterless identity policies are empty struct variants here: unit
// variants of an internally tagged enum ignore unknown fields.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", deny_unknown_fields)]
enum MatchTypeConfig {
    MatchExact {},
    MatchRepoDigestOrExact {},
    MatchRepository {},
    #[serde(rename_all = "camelCase")]
    ExactReference { docker_reference: String },
    #[serde(rename_all = "camelCase")]
    ExactRepository { docker_repository: String },
    #[serde(rename_all = "camelCase")]
    RemapIdentity {
        prefix: String,
        signed_prefix: String,
    },
}

impl From<MatchTypeConfig> for PolicyReqMatchType {
    fn from(config: MatchTypeConfig) -> Self {
        match config {
            MatchTypeConfig::MatchExact {} => PolicyReqMatchType::MatchExact,
            MatchTypeConfig::MatchRepoDigestOrExact {} => PolicyReqMatchType::MatchRepoDigestOrExact,
            MatchTypeConfig::MatchRepository {} => PolicyReqMatchType::MatchRepository,
            MatchTypeConfig::ExactReference { docker_reference } => {
                PolicyReqMatchType::ExactReference { docker_reference }
            }
            MatchTypeConfig::ExactRepository { docker_repository } => {
                PolicyReqMatchType::ExactRepository { docker_repository }
            }
            MatchTypeConfig::RemapIdentity {
                prefix,
                signed_prefix,
            } => PolicyReqMatchType::RemapIdentity {
                prefix,
                signed_prefix,
            },
        }
    }
}

impl PolicyReqMatchType {
    /// Checks the parameters of the identity policy.
    pub fn validate(&self) -> Result<()> {
        match self {
            PolicyReqMatchType::ExactReference { docker_reference } => {
                let reference = Reference::parse_normalized_named(docker_reference).map_err(|e| {
                    Error::InvalidConfiguration(format!(
                        "Invalid format of dockerReference {docker_reference}: {e}"
                    ))
                })?;
                if reference.is_name_only() {
                    return Err(Error::InvalidConfiguration(format!(
                        "dockerReference {docker_reference} contains neither a tag nor digest"
                    )));
                }
            }
            PolicyReqMatchType::ExactRepository { docker_repository } => {
                Reference::parse_normalized_named(docker_repository).map_err(|e| {
                    Error::InvalidConfiguration(format!(
                        "Invalid format of dockerRepository {docker_repository}: {e}"
                    ))
                })?;
            }
            PolicyReqMatchType::RemapIdentity {
                prefix,
                signed_prefix,
            } => {
                validate_identity_remapping_prefix(prefix)?;
                validate_identity_remapping_prefix(signed_prefix)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Returns true if a signature claiming `signed_docker_reference` is
    /// acceptable for an image referred to by `image`.
    pub fn matches_docker_reference(
        &self,
        image: Option<&Reference>,
        signed_docker_reference: &str,
    ) -> bool {
        let signature = match Reference::parse_normalized_named(signed_docker_reference) {
            Ok(signature) => signature,
            Err(_) => return false,
        };

        match self {
            PolicyReqMatchType::MatchExact => match image {
                Some(intended) => matches_exact(intended, &signature),
                None => false,
            },
            PolicyReqMatchType::MatchRepoDigestOrExact => match image {
                Some(intended) => matches_repo_digest_or_exact(intended, &signature),
                None => false,
            },
            PolicyReqMatchType::MatchRepository => match image {
                Some(intended) => intended.name() == signature.name(),
                None => false,
            },
            PolicyReqMatchType::ExactReference { docker_reference } => {
                match Reference::parse_normalized_named(docker_reference) {
                    Ok(intended) => matches_exact(&intended, &signature),
                    Err(_) => false,
                }
            }
            PolicyReqMatchType::ExactRepository { docker_repository } => {
                match Reference::parse_normalized_named(docker_repository) {
                    Ok(intended) => intended.name() == signature.name(),
                    Err(_) => false,
                }
            }
            PolicyReqMatchType::RemapIdentity {
                prefix,
                signed_prefix,
            } => {
                let Some(intended) = image else {
                    return false;
                };
                match remap_reference_prefix(intended, prefix, signed_prefix) {
                    Ok(intended) => matches_repo_digest_or_exact(&intended, &signature),
                    Err(_) => false,
                }
            }
        }
    }
}

fn matches_exact(intended: &Reference, signature: &Reference) -> bool {
    // Do not allow "registry/repo" to match "registry/repo:latest"; the
    // identity would depend on how the image was pulled.
    if intended.is_name_only() || signature.is_name_only() {
        return false;
    }
    intended.to_string() == signature.to_string()
}

fn matches_repo_digest_or_exact(intended: &Reference, signature: &Reference) -> bool {
    if intended.tag().is_some() {
        // Includes references with both a tag and a digest.
        signature.to_string() == intended.to_string()
    } else if intended.digest().is_some() {
        // The digest itself is checked against the manifest separately.
        signature.name() == intended.name()
    } else {
        false
    }
}

// Returns true if `reference` starts with `prefix` at a component boundary.
fn ref_matches_prefix(reference: &str, prefix: &str) -> bool {
    match reference.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with([':', '/', '@']),
        None => false,
    }
}

fn remap_reference_prefix(
    reference: &Reference,
    prefix: &str,
    signed_prefix: &str,
) -> Result<Reference> {
    let reference_string = reference.to_string();
    if !ref_matches_prefix(&reference_string, prefix) {
        return Ok(reference.clone());
    }
    let remapped = format!("{signed_prefix}{}", &reference_string[prefix.len()..]);
    Reference::parse_named(&remapped).map_err(|e| {
        Error::PolicyRequirement(format!(
            "Remapping {reference_string} by {prefix} -> {signed_prefix} results in an invalid reference {remapped}: {e}"
        ))
    })
}

fn validate_identity_remapping_prefix(prefix: &str) -> Result<()> {
    if is_valid_domain(prefix) {
        return Ok(());
    }
    match Reference::parse_named(prefix) {
        Ok(reference) if reference.is_name_only() => Ok(()),
        _ => Err(Error::InvalidConfiguration(format!(
            "prefix {prefix:?} is not valid"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const DIGEST: &str = "sha256:ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff";

    fn matcher(json: &str) -> PolicyReqMatchType {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn deserialize_match_types() {
        assert_eq!(
            matcher(r#"{"type": "matchExact"}"#),
            PolicyReqMatchType::MatchExact
        );
        assert_eq!(
            matcher(r#"{"type": "exactReference", "dockerReference": "busybox:latest"}"#),
            PolicyReqMatchType::ExactReference {
                docker_reference: "busybox:latest".into()
            }
        );
        assert_eq!(
            matcher(r#"{"type": "remapIdentity", "prefix": "example.com", "signedPrefix": "quay.io/ns"}"#),
            PolicyReqMatchType::RemapIdentity {
                prefix: "example.com".into(),
                signed_prefix: "quay.io/ns".into()
            }
        );
        assert_eq!(PolicyReqMatchType::default(), PolicyReqMatchType::MatchRepoDigestOrExact);

        assert!(serde_json::from_str::<PolicyReqMatchType>(r#"{"type": "unknown"}"#).is_err());
        assert!(
            serde_json::from_str::<PolicyReqMatchType>(r#"{"type": "matchExact", "extra": 1}"#)
                .is_err()
        );
        assert!(serde_json::from_str::<PolicyReqMatchType>(r#"{"type": "exactReference"}"#).is_err());
    }

    #[rstest]
    #[case(r#"{"type": "matchExact", "dockerReference": "quay.io/a/b:1"}"#)]
    #[case(r#"{"type": "matchRepoDigestOrExact", "prefix": "quay.io"}"#)]
    #[case(r#"{"type": "matchRepository", "dockerRepository": "quay.io/a/b"}"#)]
    #[case(r#"{"type": "exactReference", "dockerReference": "quay.io/a/b:1", "extra": 1}"#)]
    #[case(r#"{"type": "remapIdentity", "prefix": "a.com", "signedPrefix": "b.com", "extra": 1}"#)]
    fn reject_unknown_fields(#[case] json: &str) {
        assert!(serde_json::from_str::<PolicyReqMatchType>(json).is_err(), "{json}");
    }

    #[test]
    fn serialize_match_types() {
        let json = serde_json::to_value(PolicyReqMatchType::MatchExact).unwrap();
        assert_eq!(json, serde_json::json!({"type": "matchExact"}));
        assert_eq!(
            serde_json::from_value::<PolicyReqMatchType>(json).unwrap(),
            PolicyReqMatchType::MatchExact
        );
    }

    #[rstest]
    #[case(r#"{"type": "exactReference", "dockerReference": "busybox:latest"}"#, true)]
    #[case(r#"{"type": "exactReference", "dockerReference": "busybox"}"#, false)]
    #[case(r#"{"type": "exactReference", "dockerReference": "UPPER:latest"}"#, false)]
    #[case(r#"{"type": "exactRepository", "dockerRepository": "busybox"}"#, true)]
    #[case(r##"{"type": "exactRepository", "dockerRepository": "#"}"##, false)]
    #[case(r#"{"type": "remapIdentity", "prefix": "example.com", "signedPrefix": "quay.io/ns/repo"}"#, true)]
    #[case(r#"{"type": "remapIdentity", "prefix": "example.com:5000", "signedPrefix": "localhost"}"#, true)]
    #[case(r#"{"type": "remapIdentity", "prefix": "example.com/ns:tag", "signedPrefix": "quay.io"}"#, false)]
    #[case(r#"{"type": "remapIdentity", "prefix": "Example.com/NS", "signedPrefix": "quay.io"}"#, false)]
    #[case(r#"{"type": "remapIdentity", "prefix": "quay.io", "signedPrefix": "*.quay.io"}"#, false)]
    fn validate_match_types(#[case] json: &str, #[case] valid: bool) {
        assert_eq!(matcher(json).validate().is_ok(), valid);
    }

    // (image reference, signed reference)
    #[rstest]
    #[case::match_exact(r#"{"type": "matchExact"}"#, "busybox:latest", "docker.io/library/busybox:latest", true)]
    #[case::match_exact(r#"{"type": "matchExact"}"#, "busybox:latest", "busybox:notlatest", false)]
    #[case::match_exact(r#"{"type": "matchExact"}"#, "busybox", "busybox", false)]
    #[case::match_exact(r#"{"type": "matchExact"}"#, &format!("busybox@{DIGEST}"), &format!("busybox@{DIGEST}"), true)]
    #[case::match_exact(r#"{"type": "matchExact"}"#, "busybox:latest", "busybox:latest@", false)]
    #[case::repo_digest_or_exact(r#"{"type": "matchRepoDigestOrExact"}"#, "busybox:latest", "busybox:latest", true)]
    #[case::repo_digest_or_exact(r#"{"type": "matchRepoDigestOrExact"}"#, "busybox:latest", "busybox:other", false)]
    #[case::repo_digest_or_exact(r#"{"type": "matchRepoDigestOrExact"}"#, &format!("busybox@{DIGEST}"), "busybox:anytag", true)]
    #[case::repo_digest_or_exact(r#"{"type": "matchRepoDigestOrExact"}"#, &format!("busybox@{DIGEST}"), "busybox", true)]
    #[case::repo_digest_or_exact(r#"{"type": "matchRepoDigestOrExact"}"#, &format!("busybox@{DIGEST}"), "other:anytag", false)]
    #[case::repo_digest_or_exact(r#"{"type": "matchRepoDigestOrExact"}"#, "busybox", "busybox", false)]
    #[case::match_repository(r#"{"type": "matchRepository"}"#, "busybox:latest", "busybox:other", true)]
    #[case::match_repository(r#"{"type": "matchRepository"}"#, "busybox", "docker.io/library/busybox", true)]
    #[case::match_repository(r#"{"type": "matchRepository"}"#, "busybox:latest", "quay.io/busybox:latest", false)]
    #[case::exact_reference(r#"{"type": "exactReference", "dockerReference": "quay.io/ns/repo:v1"}"#, "unrelated:tag", "quay.io/ns/repo:v1", true)]
    #[case::exact_reference(r#"{"type": "exactReference", "dockerReference": "quay.io/ns/repo:v1"}"#, "quay.io/ns/repo:v1", "quay.io/ns/repo:v2", false)]
    #[case::exact_repository(r#"{"type": "exactRepository", "dockerRepository": "quay.io/ns/repo"}"#, "unrelated:tag", "quay.io/ns/repo:v2", true)]
    #[case::exact_repository(r#"{"type": "exactRepository", "dockerRepository": "quay.io/ns/repo"}"#, "unrelated:tag", "quay.io/ns/other:v2", false)]
    #[case::remap_identity(r#"{"type": "remapIdentity", "prefix": "mirror.example.com/ns", "signedPrefix": "quay.io/ns"}"#, "mirror.example.com/ns/repo:v1", "quay.io/ns/repo:v1", true)]
    #[case::remap_identity(r#"{"type": "remapIdentity", "prefix": "mirror.example.com/ns", "signedPrefix": "quay.io/ns"}"#, "mirror.example.com/nsx/repo:v1", "quay.io/nsx/repo:v1", false)]
    #[case::remap_identity(r#"{"type": "remapIdentity", "prefix": "mirror.example.com/ns", "signedPrefix": "quay.io/ns"}"#, "other.example.com/ns/repo:v1", "other.example.com/ns/repo:v1", true)]
    #[case::remap_identity(r#"{"type": "remapIdentity", "prefix": "mirror.example.com", "signedPrefix": "quay.io"}"#, &format!("mirror.example.com/ns/repo@{DIGEST}"), "quay.io/ns/repo:v1", true)]
    fn match_docker_reference(
        #[case] policy: &str,
        #[case] image: &str,
        #[case] signed: &str,
        #[case] expected: bool,
    ) {
        let image = Reference::parse_normalized_named(image).unwrap();
        assert_eq!(
            matcher(policy).matches_docker_reference(Some(&image), signed),
            expected
        );
    }

    #[rstest]
    #[case(r#"{"type": "matchExact"}"#, false)]
    #[case(r#"{"type": "matchRepoDigestOrExact"}"#, false)]
    #[case(r#"{"type": "matchRepository"}"#, false)]
    #[case(r#"{"type": "exactReference", "dockerReference": "quay.io/ns/repo:v1"}"#, true)]
    #[case(r#"{"type": "exactRepository", "dockerRepository": "quay.io/ns/repo"}"#, true)]
    fn match_image_without_reference(#[case] policy: &str, #[case] expected: bool) {
        assert_eq!(
            matcher(policy).matches_docker_reference(None, "quay.io/ns/repo:v1"),
            expected
        );
    }

    #[test]
    fn prefix_matching() {
        assert!(ref_matches_prefix("example.com/ns/repo:tag", "example.com"));
        assert!(ref_matches_prefix("example.com/ns/repo:tag", "example.com/ns/repo"));
        assert!(ref_matches_prefix("example.com/ns/repo", "example.com/ns/repo"));
        assert!(!ref_matches_prefix("example.com/ns/repo", "example.com/ns/re"));
        assert!(!ref_matches_prefix("example.com", "example.com/ns"));
    }
}
