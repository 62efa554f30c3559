// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;
use std::fmt::Write;

/// Key/value pairs such as build information, kept pre-rendered as `"key: value\n"` lines so a
/// report can print them without allocating or walking the map.
#[derive(Debug, Default)]
pub(crate) struct ProgramInfo {
    entries: BTreeMap<String, String>,
    rendered: String,
}

impl ProgramInfo {
    pub(crate) const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            rendered: String::new(),
        }
    }

    /// An empty `value` removes `key`.
    pub(crate) fn set(&mut self, key: &str, value: &str) {
        if value.is_empty() {
            self.entries.remove(key);
        } else {
            self.entries.insert(key.to_string(), value.to_string());
        }

        let mut rendered = String::new();
        for (key, value) in &self.entries {
            // Writing to a String cannot fail.
            let _ = writeln!(rendered, "{key}: {value}");
        }
        self.rendered = rendered;
    }

    pub(crate) fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub(crate) fn rendered(&self) -> &str {
        &self.rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_value_wins() {
        let mut info = ProgramInfo::new();
        info.set("build", "1");
        info.set("build", "2");
        assert_eq!(info.get("build"), Some("2"));
        assert_eq!(info.get("missing"), None);
    }

    #[test]
    fn test_empty_value_removes() {
        let mut info = ProgramInfo::new();
        info.set("build", "1");
        info.set("build", "");
        assert_eq!(info.get("build"), None);
        assert_eq!(info.rendered(), "");
        // Removing an unknown key is harmless.
        info.set("never-set", "");
        assert_eq!(info.rendered(), "");
    }

    #[test]
    fn test_rendered_is_sorted_and_current() {
        let mut info = ProgramInfo::new();
        info.set("version", "2.0");
        info.set("build", "abc123");
        assert_eq!(info.rendered(), "build: abc123\nversion: 2.0\n");
        info.set("version", "");
        assert_eq!(info.rendered(), "build: abc123\n");
    }
}
