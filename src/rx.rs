//! A `Regex` wrapper that serializes as its pattern string and
//! compares by pattern, so compiled expressions can live inside
//! configuration structs.

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Clone, Debug)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(pattern: &str) -> anyhow::Result<Self> {
        Ok(Pattern(Regex::new(pattern)?))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Deref for Pattern {
    type Target = Regex;

    fn deref(&self) -> &Regex {
        &self.0
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_str() == other.0.as_str()
    }
}

impl Eq for Pattern {}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl FromStr for Pattern {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Pattern::new(s)
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0.as_str())
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pattern = String::deserialize(deserializer)?;
        Regex::new(&pattern).map(Pattern).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_rejects_invalid_patterns() {
        let err = serde_json::from_str::<Pattern>("\"(\"").unwrap_err();
        assert!(err.to_string().contains("regex"));
    }

    #[test]
    fn round_trips_as_the_pattern_string() {
        let pattern: Pattern = serde_json::from_str("\"(?i)LGTM\"").unwrap();
        assert!(pattern.is_match("this lgtm to me"));
        assert_eq!(serde_json::to_string(&pattern).unwrap(), "\"(?i)LGTM\"");
    }
}
