//! Pure `*`-wildcard pattern matcher (spec §4.1).
//!
//! A single pure function: no allocation of regex state, no caching —
//! deterministic string-splitting per spec P11.

/// Returns whether `pattern` matches `value`.
///
/// - `"*"` matches anything, including the empty string.
/// - A pattern without `*` matches only by exact equality.
/// - Otherwise the pattern is split on `*` into literal segments; the first
///   and last segments anchor the start/end of `value` unless the pattern
///   begins/ends with `*`, and the remaining segments must appear in order.
///   `*` spans any characters, including `.`.
pub fn match_pattern(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') {
        return pattern == value;
    }

    let starts_with_star = pattern.starts_with('*');
    let ends_with_star = pattern.ends_with('*');
    let segments: Vec<&str> = pattern.split('*').filter(|s| !s.is_empty()).collect();

    if segments.is_empty() {
        // Pattern was made entirely of '*' characters.
        return true;
    }

    let mut rest = value;

    if !starts_with_star {
        let first = segments[0];
        if !rest.starts_with(first) {
            return false;
        }
        rest = &rest[first.len()..];
    }

    let last_index = segments.len() - 1;
    let body_end = if ends_with_star { segments.len() } else { last_index };

    let search_from = if starts_with_star { 0 } else { 1 };
    for segment in &segments[search_from..body_end] {
        match rest.find(segment) {
            Some(idx) => rest = &rest[idx + segment.len()..],
            None => return false,
        }
    }

    if !ends_with_star {
        let last = segments[last_index];
        return rest.ends_with(last);
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_everything() {
        assert!(match_pattern("*", ""));
        assert!(match_pattern("*", "anything.at.all"));
    }

    #[test]
    fn no_star_is_exact() {
        assert!(match_pattern("admin.delete", "admin.delete"));
        assert!(!match_pattern("admin.delete", "admin.delete2"));
    }

    #[test]
    fn prefix_wildcard() {
        assert!(match_pattern("admin.*", "admin.delete"));
        assert!(match_pattern("admin.*", "admin."));
        assert!(!match_pattern("admin.*", "public.delete"));
    }

    #[test]
    fn suffix_wildcard() {
        assert!(match_pattern("*.delete", "admin.delete"));
        assert!(!match_pattern("*.delete", "admin.create"));
    }

    #[test]
    fn middle_wildcard_spans_dots() {
        assert!(match_pattern("admin.*.delete", "admin.users.accounts.delete"));
        assert!(!match_pattern("admin.*.delete", "public.users.delete"));
    }

    #[test]
    fn multiple_wildcards_in_order() {
        assert!(match_pattern("a.*.b.*.c", "a.x.b.y.z.c"));
        assert!(!match_pattern("a.*.b.*.c", "a.x.c.b.y"));
    }

    #[test]
    fn is_pure_and_deterministic() {
        for _ in 0..5 {
            assert_eq!(match_pattern("public.*", "public.users.create"), true);
        }
    }
}
