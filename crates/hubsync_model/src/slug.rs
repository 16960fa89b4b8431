//! Slug derivation for entity names.

/// Converts a display value into a slug-safe name.
///
/// ASCII letters and digits are kept, every other run of characters becomes a
/// single `_`, and leading/trailing separators are dropped. Case is preserved;
/// use [`slug_key`] for comparisons.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_sep = false;

    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch);
        } else {
            pending_sep = true;
        }
    }

    out
}

/// Case-normalized slug used for name matching.
pub fn slug_key(input: &str) -> String {
    slugify(input).to_ascii_lowercase()
}

/// Returns true if two names denote the same entity under slug matching.
pub fn same_slug(a: &str, b: &str) -> bool {
    slug_key(a) == slug_key(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn keeps_plain_codes() {
        assert_eq!(slugify("shot_010"), "shot_010");
        assert_eq!(slugify("SQ01"), "SQ01");
    }

    #[test]
    fn collapses_separators() {
        assert_eq!(slugify("  Hero  Prop / v2 "), "Hero_Prop_v2");
        assert_eq!(slugify("a--b..c"), "a_b_c");
    }

    #[test]
    fn drops_non_ascii() {
        assert_eq!(slugify("café crème"), "caf_cr_me");
    }

    #[test]
    fn matching_ignores_case() {
        assert!(same_slug("Character", "character"));
        assert!(same_slug("Hero Prop", "hero_prop"));
        assert!(!same_slug("hero", "heroes"));
    }

    proptest! {
        #[test]
        fn slugify_is_idempotent(s in ".{0,40}") {
            let once = slugify(&s);
            prop_assert_eq!(slugify(&once), once);
        }

        #[test]
        fn slug_only_has_safe_chars(s in ".{0,40}") {
            let slug = slugify(&s);
            prop_assert!(slug.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
            prop_assert!(!slug.starts_with('_') && !slug.ends_with('_'));
        }
    }
}
