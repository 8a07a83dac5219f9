// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Strict reading of JSON objects for signed payloads.
//!
//! Plain `serde` derives silently accept duplicate keys (the last one wins)
//! and, unless told otherwise, unknown fields. Neither is acceptable for data
//! a signature vouches for, so objects are first read into an ordered list of
//! raw members and checked here before any value is interpreted.

use std::collections::HashSet;
use std::fmt;

use serde::de::{self, Deserialize, Deserializer, MapAccess, Visitor};
use serde_json::value::RawValue;

use crate::{Error, Result};

/// The members of a JSON object, in document order, with their values still
/// unparsed. Duplicate keys are rejected while reading.
#[derive(Debug)]
pub(crate) struct ParanoidObject(Vec<(String, Box<RawValue>)>);

impl<'de> Deserialize<'de> for ParanoidObject {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ObjectVisitor;

        impl<'de> Visitor<'de> for ObjectVisitor {
            type Value = ParanoidObject;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a JSON object")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut members: Vec<(String, Box<RawValue>)> = Vec::new();
                let mut seen = HashSet::new();
                while let Some(key) = map.next_key::<String>()? {
                    if !seen.insert(key.clone()) {
                        return Err(de::Error::custom(format!("Duplicate key \"{key}\"")));
                    }
                    let value: Box<RawValue> = map.next_value()?;
                    members.push((key, value));
                }
                Ok(ParanoidObject(members))
            }
        }

        deserializer.deserialize_map(ObjectVisitor)
    }
}

impl ParanoidObject {
    pub(crate) fn from_slice(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| Error::InvalidSignature(e.to_string()))
    }

    pub(crate) fn from_raw(raw: &RawValue) -> Result<Self> {
        serde_json::from_str(raw.get()).map_err(|e| Error::InvalidSignature(e.to_string()))
    }

    /// Checks that the object has exactly the members in `names`, and returns
    /// their raw values in the same order as `names`.
    pub(crate) fn exact_fields<const N: usize>(
        self,
        names: [&str; N],
    ) -> Result<[Box<RawValue>; N]> {
        let mut found: [Option<Box<RawValue>>; N] = std::array::from_fn(|_| None);
        for (key, value) in self.0 {
            match names.iter().position(|name| *name == key) {
                Some(i) => found[i] = Some(value),
                None => {
                    return Err(Error::InvalidSignature(format!("Unexpected key \"{key}\"")))
                }
            }
        }

        let mut values = Vec::with_capacity(N);
        for (name, value) in names.iter().zip(found) {
            match value {
                Some(value) => values.push(value),
                None => {
                    return Err(Error::InvalidSignature(format!(
                        "Key \"{name}\" missing in a JSON object"
                    )))
                }
            }
        }
        values
            .try_into()
            .map_err(|_| Error::Internal("unexpected JSON object member count".into()))
    }

    /// Returns all members, for objects which tolerate unknown keys.
    pub(crate) fn into_members(self) -> Vec<(String, Box<RawValue>)> {
        self.0
    }
}

/// Parses a member value which must be a JSON string.
pub(crate) fn string_value(raw: &RawValue, field: &str) -> Result<String> {
    serde_json::from_str(raw.get())
        .map_err(|e| Error::InvalidSignature(format!("Field {field} is not a string: {e}")))
}
