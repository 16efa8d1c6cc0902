//! Metric selectors used by alert rules.
//!
//! Grammar: `name`, `prefix.*`, optionally followed by `{key=value,...}`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::MonitorError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum NamePattern {
    Exact(String),
    Prefix(String),
}

/// A parsed metric selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSelector {
    name: NamePattern,
    tags: Vec<(String, String)>,
}

impl MetricSelector {
    /// Parse a selector string.
    pub fn parse(raw: &str) -> Result<Self, MonitorError> {
        let raw = raw.trim();
        let (name_part, tag_part) = match raw.find('{') {
            Some(open) => {
                if !raw.ends_with('}') {
                    return Err(MonitorError::validation(
                        "metric",
                        format!("unterminated tag filter in '{}'", raw),
                    ));
                }
                (&raw[..open], Some(&raw[open + 1..raw.len() - 1]))
            }
            None => (raw, None),
        };

        let name_part = name_part.trim();
        if name_part.is_empty() {
            return Err(MonitorError::validation("metric", "selector name is empty"));
        }
        if name_part.chars().any(char::is_whitespace) {
            return Err(MonitorError::validation(
                "metric",
                format!("selector name '{}' contains whitespace", name_part),
            ));
        }

        let name = match name_part.strip_suffix('*') {
            Some(prefix) if prefix.contains('*') => {
                return Err(MonitorError::validation(
                    "metric",
                    "only a single trailing '*' is supported",
                ));
            }
            Some(prefix) => NamePattern::Prefix(prefix.to_string()),
            None if name_part.contains('*') => {
                return Err(MonitorError::validation(
                    "metric",
                    "only a single trailing '*' is supported",
                ));
            }
            None => NamePattern::Exact(name_part.to_string()),
        };

        let mut tags = Vec::new();
        if let Some(tag_part) = tag_part {
            for pair in tag_part.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').ok_or_else(|| {
                    MonitorError::validation("metric", format!("tag filter '{}' is not key=value", pair))
                })?;
                let key = key.trim();
                if key.is_empty() {
                    return Err(MonitorError::validation("metric", "tag filter key is empty"));
                }
                tags.push((key.to_string(), value.trim().to_string()));
            }
        }

        Ok(Self { name, tags })
    }

    /// Whether a metric with `name` and `tags` is selected.
    pub fn matches(&self, name: &str, tags: &HashMap<String, String>) -> bool {
        let name_ok = match &self.name {
            NamePattern::Exact(exact) => name == exact,
            NamePattern::Prefix(prefix) => name.starts_with(prefix.as_str()),
        };
        name_ok
            && self
                .tags
                .iter()
                .all(|(k, v)| tags.get(k).is_some_and(|actual| actual == v))
    }

    /// Exact series name, if the selector names a single series.
    pub fn exact_name(&self) -> Option<&str> {
        match &self.name {
            NamePattern::Exact(name) => Some(name),
            NamePattern::Prefix(_) => None,
        }
    }
}

impl FromStr for MetricSelector {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MetricSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            NamePattern::Exact(name) => write!(f, "{}", name)?,
            NamePattern::Prefix(prefix) => write!(f, "{}*", prefix)?,
        }
        if !self.tags.is_empty() {
            let tags: Vec<String> = self.tags.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            write!(f, "{{{}}}", tags.join(","))?;
        }
        Ok(())
    }
}
