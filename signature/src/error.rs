// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The signing mechanism could not verify the signature blob: bad
    /// signature, unknown key or malformed envelope.
    #[error("Signature verification failed: {source}")]
    CryptographicVerification {
        #[source]
        source: anyhow::Error,
    },

    /// The signed payload does not parse, or carries fields that are not allowed.
    #[error("Invalid signature format: {0}")]
    InvalidSignature(String),

    /// The signature or image does not satisfy a policy requirement.
    #[error("{0}")]
    PolicyRequirement(String),

    #[error("{0}")]
    Unimplemented(String),

    /// Key material or another external resource could not be read or loaded.
    #[error("{context}: {source}")]
    Resource {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Signing not supported: {0}")]
    SigningNotSupported(String),

    #[error("{0}")]
    UnsupportedOperation(String),

    #[error("Signing failed: {source}")]
    Signing {
        #[source]
        source: anyhow::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn resource(context: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Error::Resource {
            context: context.into(),
            source: source.into(),
        }
    }
}
