//! Resource tags and tag-based run filtering

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A normalized set of tags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tags(BTreeSet<String>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tag if it is valid; tags are lowercased
    pub fn insert(&mut self, tag: &str) -> bool {
        let tag = tag.trim().to_lowercase();
        if !valid_tag(&tag) {
            return false;
        }
        self.0.insert(tag)
    }

    /// Add every tag from another set
    pub fn merge(&mut self, other: &Tags) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(&tag.to_lowercase())
    }

    /// Whether any of the given tags is present
    pub fn tagged_with_any(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.contains(t))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for Tags {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut tags = Tags::new();
        for tag in iter {
            tags.insert(tag.as_ref());
        }
        tags
    }
}

/// Tags may contain letters, digits, `_`, `-`, `.` and `::`
fn valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}

/// Split a comma-separated tag list ("one, two") into tags
pub fn parse_tag_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}
