//! Tag group sets and lookup responses
//!
//! A `TagGroups` value maps a group identifier to the set of tags requested
//! (or returned) for that group. Both sides are ordered sets, so equality is
//! set equality regardless of insertion order.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A set of tags keyed by group identifier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagGroups {
    groups: BTreeMap<String, BTreeSet<String>>,
}

impl TagGroups {
    /// Creates an empty set of tag groups
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a single tag to a group, creating the group if needed
    pub fn insert(&mut self, group: impl Into<String>, tag: impl Into<String>) {
        self.groups
            .entry(group.into())
            .or_default()
            .insert(tag.into());
    }

    /// Adds several tags to a group
    ///
    /// An empty iterator still registers the group, which matters for
    /// `contains_all`: a requested group with no tags is covered only if the
    /// group itself was requested.
    pub fn add_tags<I, T>(&mut self, group: impl Into<String>, tags: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let entry = self.groups.entry(group.into()).or_default();
        entry.extend(tags.into_iter().map(Into::into));
    }

    /// Iterates over group identifiers in order
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Returns the tags for a group, if the group is present
    pub fn tags(&self, group: &str) -> Option<&BTreeSet<String>> {
        self.groups.get(group)
    }

    /// Returns true if there are no groups
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Returns true if every group and tag in `other` is also present here
    pub fn contains_all(&self, other: &TagGroups) -> bool {
        other.groups.iter().all(|(group, tags)| {
            self.groups
                .get(group)
                .is_some_and(|ours| tags.is_subset(ours))
        })
    }

    /// Keeps only the groups and tags that also appear in `requested`
    ///
    /// Groups left with no tags are dropped.
    pub fn intersect(&self, requested: &TagGroups) -> TagGroups {
        let groups = self
            .groups
            .iter()
            .filter_map(|(group, tags)| {
                let wanted = requested.groups.get(group)?;
                let kept: BTreeSet<String> = tags.intersection(wanted).cloned().collect();
                (!kept.is_empty()).then(|| (group.clone(), kept))
            })
            .collect();
        TagGroups { groups }
    }

    /// Returns the union of both sets of tag groups
    pub fn merge(&self, other: &TagGroups) -> TagGroups {
        let mut merged = self.clone();
        for (group, tags) in &other.groups {
            merged.add_tags(group.clone(), tags.iter().cloned());
        }
        merged
    }
}

impl<G, T> FromIterator<(G, T)> for TagGroups
where
    G: Into<String>,
    T: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (G, T)>>(iter: I) -> Self {
        let mut groups = TagGroups::new();
        for (group, tag) in iter {
            groups.insert(group, tag);
        }
        groups
    }
}

/// Response returned by a tag group lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagGroupsLookupResponse {
    /// HTTP-like status reported by the lookup service
    pub status: u16,
    /// Tag groups the service reports for the channel
    pub tag_groups: TagGroups,
    /// Opaque last-modified marker from the service, if any
    #[serde(default)]
    pub last_modified: Option<String>,
}

impl TagGroupsLookupResponse {
    /// Creates a successful response with the given tag groups
    pub fn ok(tag_groups: TagGroups) -> Self {
        Self {
            status: 200,
            tag_groups,
            last_modified: None,
        }
    }

    /// Whether the service reported success
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
