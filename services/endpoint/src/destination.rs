//! Destination shapes accepted by the user-facing API.
//!
//! Three forms, all validated synchronously before any I/O:
//! - a single group name,
//! - a set of group names,
//! - a map group -> signed count (negative broadcasts, positive produces or
//!   notifies for that many, zero is a no-op).
//!
//! The bare-name forms pick up a context-dependent default count: `-1`
//! (broadcast) for `send_object`, `1` for `notify`.

use std::collections::BTreeMap;

use crate::EndpointError;

#[derive(Debug, Clone)]
pub enum Destination {
    Group(String),
    Groups(Vec<String>),
    Counts(BTreeMap<String, i64>),
}

impl Destination {
    /// Normalize into a counts map, rejecting empty destinations.
    pub(crate) fn into_counts(
        self,
        default_count: i64,
    ) -> Result<BTreeMap<String, i64>, EndpointError> {
        let counts: BTreeMap<String, i64> = match self {
            Destination::Group(group) => std::iter::once((group, default_count)).collect(),
            Destination::Groups(groups) => groups
                .into_iter()
                .map(|group| (group, default_count))
                .collect(),
            Destination::Counts(counts) => counts,
        };
        if counts.is_empty() {
            return Err(EndpointError::InvalidDestination(
                "at least one group is required".to_owned(),
            ));
        }
        Ok(counts)
    }
}

impl From<&str> for Destination {
    fn from(group: &str) -> Self {
        Destination::Group(group.to_owned())
    }
}

impl From<String> for Destination {
    fn from(group: String) -> Self {
        Destination::Group(group)
    }
}

impl From<&[&str]> for Destination {
    fn from(groups: &[&str]) -> Self {
        Destination::Groups(groups.iter().map(|g| (*g).to_owned()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Destination {
    fn from(groups: [&str; N]) -> Self {
        Destination::Groups(groups.iter().map(|g| (*g).to_owned()).collect())
    }
}

impl From<Vec<String>> for Destination {
    fn from(groups: Vec<String>) -> Self {
        Destination::Groups(groups)
    }
}

impl From<Vec<&str>> for Destination {
    fn from(groups: Vec<&str>) -> Self {
        Destination::Groups(groups.iter().map(|g| (*g).to_owned()).collect())
    }
}

impl From<BTreeMap<String, i64>> for Destination {
    fn from(counts: BTreeMap<String, i64>) -> Self {
        Destination::Counts(counts)
    }
}

impl From<BTreeMap<&str, i64>> for Destination {
    fn from(counts: BTreeMap<&str, i64>) -> Self {
        Destination::Counts(
            counts
                .into_iter()
                .map(|(group, count)| (group.to_owned(), count))
                .collect(),
        )
    }
}
