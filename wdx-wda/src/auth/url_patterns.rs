// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Matching of unauthenticated-URL patterns.
//!
//! A pattern is a `/`-separated sequence of literal segments and variable
//! placeholders of the form `:name:`, each placeholder matching exactly one
//! non-slash segment.

use regex::Regex;

/// Compiles one URL pattern into an anchored regex.
pub fn build_pattern_regex(template: &str) -> Result<Regex, regex::Error> {
    let pattern: String = template
        .split('/')
        .map(|segment| {
            if is_placeholder(segment) {
                "[^/]+".to_string()
            } else {
                regex::escape(segment)
            }
        })
        .collect::<Vec<_>>()
        .join("/");
    Regex::new(&format!("^{pattern}$"))
}

/// Whether `path` matches `template`.
pub fn matches(template: &str, path: &str) -> bool {
    match build_pattern_regex(template) {
        Ok(regex) => regex.is_match(path),
        Err(_) => false,
    }
}

fn is_placeholder(segment: &str) -> bool {
    segment.len() > 2 && segment.starts_with(':') && segment.ends_with(':')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_patterns_match_exactly() {
        assert!(matches("/some/path", "/some/path"));
        assert!(!matches("/some/path", "/some/path/deeper"));
        assert!(!matches("/some/path", "/some"));
    }

    #[test]
    fn placeholders_match_one_segment() {
        assert!(matches("/some/path/:var:/testing", "/some/path/anything-here/testing"));
        assert!(matches("/some/path/:var:/testing", "/some/path/42/testing"));
        assert!(!matches("/some/path/:var:/testing", "/some/path//testing"));
        assert!(!matches("/some/path/:var:/testing", "/some/path/a/b/testing"));
    }

    #[test]
    fn literal_segments_are_not_regex_material() {
        assert!(matches("/files/a.b", "/files/a.b"));
        assert!(!matches("/files/a.b", "/files/aXb"));
    }

    #[test]
    fn lone_colons_are_literals() {
        assert!(matches("/odd/::", "/odd/::"));
        assert!(!matches("/odd/::", "/odd/value"));
    }
}
