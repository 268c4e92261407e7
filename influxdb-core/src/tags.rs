//! Tag key-value pairs identifying the series dimension of a data point

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::{InfluxError, InfluxResult};

/// An immutable-by-convention set of tag key-value pairs.
///
/// Backed by a `BTreeMap` so the set hashes deterministically and tags are
/// emitted in key order, which is the order InfluxDB prefers on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet {
    tags: BTreeMap<String, String>,
}

impl TagSet {
    /// Create a new empty tag set
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tag set from a HashMap
    pub fn from_map(map: HashMap<String, String>) -> InfluxResult<Self> {
        Self::from_pairs(map)
    }

    /// Create a tag set from any iterator of key-value pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> InfluxResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut tags = BTreeMap::new();

        for (key, value) in pairs {
            let key = key.into();
            if key.is_empty() {
                return Err(InfluxError::validation("Tag key cannot be empty"));
            }
            tags.insert(key, value.into());
        }

        if tags.len() > crate::MAX_TAGS_PER_POINT {
            return Err(InfluxError::validation(format!(
                "Too many tags: {} > {}",
                tags.len(),
                crate::MAX_TAGS_PER_POINT
            )));
        }

        Ok(Self { tags })
    }

    /// Copy of this set keeping only the pairs `keep` accepts
    pub fn filtered<F>(&self, mut keep: F) -> TagSet
    where
        F: FnMut(&str, &str) -> bool,
    {
        TagSet {
            tags: self
                .tags
                .iter()
                .filter(|(k, v)| keep(k, v))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Get a tag value by key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Check if a tag key exists
    pub fn contains_key(&self, key: &str) -> bool {
        self.tags.contains_key(key)
    }

    /// Get the number of tags
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Check if the tag set is empty
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Iterate over tag key-value pairs in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Convert to a standard HashMap
    pub fn to_hash_map(&self) -> HashMap<String, String> {
        self.tags.clone().into_iter().collect()
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.tags.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_set_from_pairs() {
        let tags = TagSet::from_pairs([("region", "eu"), ("host", "a")]).unwrap();

        assert_eq!(tags.len(), 2);
        assert_eq!(tags.get("host"), Some("a"));
        assert!(tags.contains_key("region"));
        assert!(!tags.contains_key("zone"));

        let keys: Vec<_> = tags.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["host", "region"]);
    }

    #[test]
    fn test_tag_set_rejects_empty_key() {
        assert!(TagSet::from_pairs([("", "value")]).is_err());
    }

    #[test]
    fn test_tag_set_limit() {
        let pairs = (0..=crate::MAX_TAGS_PER_POINT).map(|i| (format!("k{}", i), "v".to_string()));
        assert!(TagSet::from_pairs(pairs).is_err());
    }

    #[test]
    fn test_hash_map_conversion() {
        let mut map = HashMap::new();
        map.insert("host".to_string(), "server1".to_string());
        map.insert("region".to_string(), "us-east-1".to_string());

        let tags = TagSet::from_map(map.clone()).unwrap();
        assert_eq!(tags.to_hash_map(), map);
        assert_eq!(tags.to_string(), "{host=server1, region=us-east-1}");
    }
}
