//! Subject grammar: dot-delimited elements, strict charset `[A-Z0-9_-]`
//! (lenient mode adds lowercase). Subscription patterns may additionally use
//! `*` (exactly one element), and `>` (one or more) / `+` (zero or more) as
//! the final element.

pub(crate) fn is_valid_element(element: &str, lenient: bool) -> bool {
    !element.is_empty()
        && element.chars().all(|c| {
            c.is_ascii_uppercase()
                || c.is_ascii_digit()
                || c == '_'
                || c == '-'
                || (lenient && c.is_ascii_lowercase())
        })
}

/// Whether `subject` is a publishable subject (no wildcard elements).
pub fn is_valid(subject: &str, lenient: bool) -> bool {
    subject.split('.').all(|e| is_valid_element(e, lenient))
}

/// Whether `pattern` is a valid subscription pattern.
pub fn is_valid_subscription(pattern: &str, lenient: bool) -> bool {
    let elements: Vec<&str> = pattern.split('.').collect();
    for (i, element) in elements.iter().enumerate() {
        let last = i == elements.len() - 1;
        match *element {
            "*" => {}
            ">" | "+" if last => {}
            ">" | "+" => return false,
            e => {
                if !is_valid_element(e, lenient) {
                    return false;
                }
            }
        }
    }
    true
}

/// Element-wise, left-to-right match of `subject` against a subscription
/// `pattern`. Comparison is case-sensitive.
pub fn matches(subject: &str, pattern: &str) -> bool {
    matches_impl(subject, pattern, false)
}

/// Like [matches], but compares elements case-insensitively.
pub fn matches_lenient(subject: &str, pattern: &str) -> bool {
    matches_impl(subject, pattern, true)
}

fn matches_impl(subject: &str, pattern: &str, lenient: bool) -> bool {
    let sub: Vec<&str> = subject.split('.').collect();
    let pat: Vec<&str> = pattern.split('.').collect();

    let mut i = 0;
    loop {
        if i == sub.len() {
            // subject exhausted: a trailing "+" still matches zero elements
            return i == pat.len() || (pat.len() == i + 1 && pat[i] == "+");
        }
        if i == pat.len() {
            return false;
        }
        match pat[i] {
            ">" | "+" => return true,
            "*" => {}
            elem => {
                let matched = if lenient {
                    elem.eq_ignore_ascii_case(sub[i])
                } else {
                    elem == sub[i]
                };
                if !matched {
                    return false;
                }
            }
        }
        i += 1;
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::plain("GMSEC.MISSION.SAT1.MSG.HB", true)]
    #[case::charset("A-B_C.0123", true)]
    #[case::single_element("A", true)]
    #[case::empty("", false)]
    #[case::empty_middle_element("A..B", false)]
    #[case::leading_dot(".A.B", false)]
    #[case::trailing_dot("A.B.", false)]
    #[case::wildcard_not_allowed("A.*.B", false)]
    #[case::tail_wildcard_not_allowed("A.>", false)]
    #[case::lowercase("a.b", false)]
    fn test_is_valid_strict(#[case] subject: &str, #[case] expected: bool) {
        assert_eq!(is_valid(subject, false), expected);
    }

    #[rstest]
    #[case::lowercase("gmsec.Mission.SAT1", true)]
    #[case::empty_element_still_invalid("a..b", false)]
    #[case::space_still_invalid("a b.c", false)]
    fn test_is_valid_lenient(#[case] subject: &str, #[case] expected: bool) {
        assert_eq!(is_valid(subject, true), expected);
    }

    #[rstest]
    #[case::no_wildcards("A.B.C", true)]
    #[case::star_anywhere("A.*.C", true)]
    #[case::leading_star("*.B", true)]
    #[case::tail_gt("A.B.>", true)]
    #[case::tail_plus("A.B.+", true)]
    #[case::bare_gt(">", true)]
    #[case::gt_not_final("A.>.B", false)]
    #[case::plus_not_final("+.B", false)]
    #[case::empty_element("A..>", false)]
    #[case::bad_charset("A.b.>", false)]
    fn test_is_valid_subscription_strict(#[case] pattern: &str, #[case] expected: bool) {
        assert_eq!(is_valid_subscription(pattern, false), expected);
    }

    #[rstest]
    #[case::exact("A.B", "A.B", true)]
    #[case::tail_one_or_more("A.B.C", "A.>", true)]
    #[case::tail_one_or_more_needs_one("A", "A.>", false)]
    #[case::tail_zero_or_more_zero("A", "A.+", true)]
    #[case::tail_zero_or_more_many("A.B.C.D", "A.+", true)]
    #[case::subject_shorter("A.B", "A.B.C", false)]
    #[case::subject_longer("A.B.C", "A.B", false)]
    #[case::star_one_element("A.B", "A.*", true)]
    #[case::star_not_two_elements("A.B", "*", false)]
    #[case::star_middle("A.B.C", "A.*.C", true)]
    #[case::star_mismatch_after("A.B.D", "A.*.C", false)]
    #[case::literal_mismatch("A.B", "A.C", false)]
    #[case::case_sensitive("A.b", "A.B", false)]
    fn test_matches(#[case] subject: &str, #[case] pattern: &str, #[case] expected: bool) {
        assert_eq!(matches(subject, pattern), expected);
    }

    #[test]
    fn test_matches_lenient() {
        assert!(matches_lenient("A.b", "A.B"));
        assert!(!matches_lenient("A.C", "A.B"));
    }
}
