//! Segmented glob matching for event types. No regex dependency.

/// Does `event_type` satisfy `pattern`?
///
/// `pattern` is split on `.` into segments. A bare `*` matches anything.
/// Otherwise both sides must have the same segment count, and each pattern
/// segment must be `*` (wildcards exactly one segment) or match literally.
pub fn matches(pattern: &str, event_type: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    let pattern_segments: Vec<&str> = pattern.split('.').collect();
    let type_segments: Vec<&str> = event_type.split('.').collect();

    if pattern_segments.len() != type_segments.len() {
        return false;
    }

    pattern_segments
        .iter()
        .zip(type_segments.iter())
        .all(|(p, t)| *p == "*" || p == t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_star_matches_anything() {
        assert!(matches("*", "order.created"));
        assert!(matches("*", "a.b.c.d"));
        assert!(matches("*", ""));
    }

    #[test]
    fn single_segment_wildcard_matches_one_level() {
        assert!(matches("order.*", "order.created"));
        assert!(!matches("order.*", "order.item.created"));
    }

    #[test]
    fn wildcard_in_the_middle() {
        assert!(matches("order.*.shipped", "order.123.shipped"));
        assert!(!matches("order.*.shipped", "order.shipped"));
    }

    #[test]
    fn literal_segments_must_match_exactly() {
        assert!(matches("order.created", "order.created"));
        assert!(!matches("order.created", "order.updated"));
    }

    #[test]
    fn differing_segment_counts_never_match_unless_bare_star() {
        assert!(!matches("order.*", "order"));
        assert!(!matches("order", "order.created"));
    }
}
