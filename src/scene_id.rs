// src/scene_id.rs
//! Scene identifiers and their canonical ordering.
//!
//! Ids look like `s1`, `s12`, `s32a`. Ordering compares the numeric part
//! first and the suffix second, so `s2 < s10 < s32 < s32a < s33`. Ids that
//! do not follow the `s<digits><suffix>` shape sort after every well-formed
//! id, by plain string comparison.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

lazy_static! {
    static ref SCENE_ID_RE: Regex = Regex::new(r"^[sS](\d+)([A-Za-z_\-]*)$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SceneId(String);

impl SceneId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Default id for the scene at 1-based position `index`.
    pub fn from_index(index: usize) -> Self {
        Self(format!("s{}", index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn parts(&self) -> Option<(u64, &str)> {
        let caps = SCENE_ID_RE.captures(&self.0)?;
        let number = caps.get(1)?.as_str().parse::<u64>().ok()?;
        let suffix = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        Some((number, suffix))
    }

    /// Renderer class name: first letter upper-cased (`s1` -> `S1`).
    pub fn class_name(&self) -> String {
        let mut chars = self.0.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

impl Ord for SceneId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.parts(), other.parts()) {
            (Some((a_num, a_suffix)), Some((b_num, b_suffix))) => a_num
                .cmp(&b_num)
                .then_with(|| a_suffix.cmp(b_suffix))
                .then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for SceneId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SceneId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SceneId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Sort ids into canonical order in place.
pub fn sort_canonical(ids: &mut [SceneId]) {
    ids.sort();
}
