//! Identifier types and their JSON representation.
//!
//! Every 64-bit id leaves the server as a decimal string so JavaScript
//! clients never lose precision. Inbound ids are accepted as either a string
//! or a number.

use serde::{de, Deserializer, Serializer};
use std::fmt;

pub type UserId = u64;
pub type ChannelId = u64;
pub type MessageId = u64;

/// `#[serde(with = "crate::ids::string")]` for a single `u64` field.
pub mod string {
    use super::*;

    pub fn serialize<S: Serializer>(id: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(id)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        deserializer.deserialize_any(IdVisitor)
    }
}

/// `#[serde(default, deserialize_with = "crate::ids::option::deserialize")]`
/// for an optional id that may be absent or `null`.
pub mod option {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Id(#[serde(with = "super::string")] u64);

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        Ok(Option::<Id>::deserialize(deserializer)?.map(|Id(id)| id))
    }
}

struct IdVisitor;

impl<'de> de::Visitor<'de> for IdVisitor {
    type Value = u64;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an unsigned 64-bit id as a string or number")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
        u64::try_from(v).map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
        v.parse::<u64>()
            .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
    }
}

/// Parse an id taken from a URL path segment.
pub fn parse_id(raw: &str) -> Option<u64> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}
