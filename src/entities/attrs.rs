//! Image tag storage: free-form key/value metadata read from and written to files.
//!
//! Used by Image, ImageIoInfo and every codec that carries header text
//! (PIC comment, JPEG COM marker, DPX/Cineon header strings, EXR attributes).
//! Well-known tag names live in [`tags`]; codecs may add their own keys.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Standard tag names shared across codecs.
pub mod tags {
    pub const PROJECT: &str = "Project";
    pub const CREATOR: &str = "Creator";
    pub const DESCRIPTION: &str = "Description";
    pub const COPYRIGHT: &str = "Copyright";
    pub const TIME: &str = "Time";
    pub const UTC_OFFSET: &str = "UTC Offset";
    pub const KEYCODE: &str = "Keycode";
    pub const TIMECODE: &str = "Timecode";

    /// All standard tags, in display order.
    pub const ALL: [&str; 8] = [
        PROJECT, CREATOR, DESCRIPTION, COPYRIGHT, TIME, UTC_OFFSET, KEYCODE, TIMECODE,
    ];
}

/// Tag value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Bool(bool),
    Str(String),
    Int(i32),
    UInt(u32),
    Float(f32),
}

impl Hash for AttrValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        use AttrValue::*;
        std::mem::discriminant(self).hash(state);
        match self {
            Bool(v) => v.hash(state),
            Str(v) => v.hash(state),
            Int(v) => v.hash(state),
            UInt(v) => v.hash(state),
            Float(v) => v.to_bits().hash(state),
        }
    }
}

impl std::fmt::Display for AttrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrValue::Bool(v) => write!(f, "{v}"),
            AttrValue::Str(v) => write!(f, "{v}"),
            AttrValue::Int(v) => write!(f, "{v}"),
            AttrValue::UInt(v) => write!(f, "{v}"),
            AttrValue::Float(v) => write!(f, "{v}"),
        }
    }
}

/// Tag container: string key → typed value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attrs {
    #[serde(default)]
    map: HashMap<String, AttrValue>,
}

impl Attrs {
    pub fn new() -> Self {
        Self { map: HashMap::new() }
    }

    pub fn set(&mut self, key: impl Into<String>, value: AttrValue) {
        self.map.insert(key.into(), value);
    }

    /// Set a string tag; empty strings are not stored.
    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        if !value.is_empty() {
            self.map.insert(key.into(), AttrValue::Str(value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.map.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.map.get(key) {
            Some(AttrValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        match self.map.get(key) {
            Some(AttrValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        match self.map.get(key) {
            Some(AttrValue::UInt(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_float(&self, key: &str) -> Option<f32> {
        match self.map.get(key) {
            Some(AttrValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.map.get(key) {
            Some(AttrValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    /// Copy every tag from `other`, overwriting existing keys.
    pub fn merge(&mut self, other: &Attrs) {
        for (k, v) in other.iter() {
            self.map.insert(k.clone(), v.clone());
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<AttrValue> {
        self.map.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.map.iter()
    }

    /// Iterate in key order (for stable printing).
    pub fn iter_sorted(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        let mut entries: Vec<_> = self.map.iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        entries.into_iter()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_str_skips_empty() {
        let mut attrs = Attrs::new();
        attrs.set_str(tags::DESCRIPTION, "");
        assert!(attrs.is_empty());
        attrs.set_str(tags::DESCRIPTION, "plate");
        assert_eq!(attrs.get_str(tags::DESCRIPTION), Some("plate"));
    }

    #[test]
    fn test_merge_and_sorted_iteration() {
        let mut a = Attrs::new();
        a.set("Zeta", AttrValue::Int(1));
        let mut b = Attrs::new();
        b.set("Alpha", AttrValue::UInt(2));
        b.set("Zeta", AttrValue::Int(3));
        a.merge(&b);

        let keys: Vec<&str> = a.iter_sorted().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["Alpha", "Zeta"]);
        assert_eq!(a.get_i32("Zeta"), Some(3));
    }
}
