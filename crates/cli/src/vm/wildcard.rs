//! Glob-style VM name matching.
//!
//! `vm start`/`stop`/`delete` accept `*` and `?` patterns so one argument
//! can address a fleet. Matching is case-sensitive, whole-name only, and
//! preserves the input order of the candidate list.

use regex::Regex;

use crate::errors::{HarvesterError, Result};

/// Whether an argument should be treated as a pattern instead of a literal
/// name.
pub fn is_wildcard(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

fn pattern_to_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 4);
    expr.push('^');
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            c => expr.push_str(&regex::escape(&c.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr)
        .map_err(|e| HarvesterError::validation(format!("invalid name pattern {pattern:?}: {e}")))
}

/// All names matching the glob pattern, in input order.
pub fn match_vm_names(pattern: &str, all_names: &[String]) -> Result<Vec<String>> {
    let regex = pattern_to_regex(pattern)?;
    Ok(all_names
        .iter()
        .filter(|name| regex.is_match(name))
        .cloned()
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_star_matches_prefix() {
        let all = names(&["web-1", "web-2", "db-1"]);
        let matched = match_vm_names("web-*", &all).unwrap();
        assert_eq!(matched, names(&["web-1", "web-2"]));
    }

    #[test]
    fn test_question_mark_matches_single_character() {
        let all = names(&["web-1", "web-12", "web-a"]);
        assert_eq!(
            match_vm_names("web-?", &all).unwrap(),
            names(&["web-1", "web-a"])
        );
    }

    #[test]
    fn test_matching_is_case_sensitive_and_whole_name() {
        let all = names(&["Web-1", "web-1", "prod-web-1"]);
        assert_eq!(match_vm_names("web-*", &all).unwrap(), names(&["web-1"]));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let all = names(&["a.b", "axb"]);
        assert_eq!(match_vm_names("a.b", &all).unwrap(), names(&["a.b"]));
    }

    #[test]
    fn test_order_is_preserved() {
        let all = names(&["z-1", "a-1", "m-1"]);
        assert_eq!(
            match_vm_names("*-1", &all).unwrap(),
            names(&["z-1", "a-1", "m-1"])
        );
    }

    #[test]
    fn test_is_wildcard() {
        assert!(is_wildcard("web-*"));
        assert!(is_wildcard("web-?"));
        assert!(!is_wildcard("web-1"));
    }
}
