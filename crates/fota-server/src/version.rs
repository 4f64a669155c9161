//! Firmware version ordering.
//!
//! Versions are dot-separated sequences of non-negative integers. Two versions
//! are compared component by component after padding the shorter one with
//! zeros, so `1.2` equals `1.2.0` and `1.10` sorts after `1.9`.

use crate::error::VersionError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// The version every empty catalog starts from.
pub const INITIAL_VERSION: &str = "0.0.0";

/// A parsed firmware version.
///
/// Keeps the string it was parsed from so it can be written back verbatim.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    components: Vec<u64>,
}

impl Version {
    /// Parse a dot-separated version string.
    ///
    /// # Errors
    ///
    /// Returns `VersionError` if the string is empty or any component is not
    /// made of ASCII digits only.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        if input.is_empty() {
            return Err(VersionError::Empty);
        }

        let components = input
            .split('.')
            .map(|component| {
                if component.is_empty() {
                    return Err(VersionError::EmptyComponent(input.to_string()));
                }
                if !component.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(VersionError::InvalidComponent {
                        version: input.to_string(),
                        component: component.to_string(),
                    });
                }
                component
                    .parse::<u64>()
                    .map_err(|_| VersionError::InvalidComponent {
                        version: input.to_string(),
                        component: component.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: input.to_string(),
            components,
        })
    }

    /// The zero version `0.0.0`.
    #[must_use]
    pub fn initial() -> Self {
        Self {
            raw: INITIAL_VERSION.to_string(),
            components: vec![0, 0, 0],
        }
    }

    /// The string this version was parsed from.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Numeric components as parsed.
    #[must_use]
    pub fn components(&self) -> &[u64] {
        &self.components
    }

    /// Components with trailing zeros removed; equal versions share this form.
    fn significant(&self) -> &[u64] {
        let len = self
            .components
            .iter()
            .rposition(|&c| c != 0)
            .map_or(0, |i| i + 1);
        &self.components[..len]
    }
}

/// Compare two version strings.
///
/// # Errors
///
/// Returns `VersionError` if either string is malformed.
pub fn compare(a: &str, b: &str) -> Result<Ordering, VersionError> {
    Ok(Version::parse(a)?.cmp(&Version::parse(b)?))
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for i in 0..len {
            let a = self.components.get(i).copied().unwrap_or(0);
            let b = other.components.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significant().hash(state);
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
