// State names are validated against the same rules the shared-object
// namespace imposes on its own entries, then wrapped in a fixed prefix to
// get the name actually passed to the shared-object store.

use kstate_base::{invalid_argument, Result};

const PREFIX: &str = "/kstate.";

/// The longest name accepted, one less than the host's maximum filename
/// length (the prefix itself doesn't count against this).
pub fn max_name_len() -> usize {
    libc::NAME_MAX as usize - 1
}

/// Validate a user-supplied state name: non-empty, no longer than
/// [`max_name_len`], alphanumeric-and-dot only, no leading/trailing dot, no
/// adjacent dots.
pub fn validate_name(caller: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(invalid_argument(format!(
            "{caller}: state name may not be zero length"
        )));
    }
    if name.len() > max_name_len() {
        return Err(invalid_argument(format!(
            "{caller}: state name '{name}' is {} characters long, but the maximum length is {} characters",
            name.len(),
            max_name_len()
        )));
    }
    let bytes = name.as_bytes();
    if bytes[0] == b'.' || bytes[bytes.len() - 1] == b'.' {
        return Err(invalid_argument(format!(
            "{caller}: state name '{name}' may not start or end with '.'"
        )));
    }
    let mut prev_was_dot = false;
    for &b in bytes {
        if b == b'.' {
            if prev_was_dot {
                return Err(invalid_argument(format!(
                    "{caller}: state name '{name}' may not have adjacent '.'s"
                )));
            }
            prev_was_dot = true;
        } else if !b.is_ascii_alphanumeric() {
            return Err(invalid_argument(format!(
                "{caller}: state name '{name}' may not contain '{}' (not alphanumeric)",
                b as char
            )));
        } else {
            prev_was_dot = false;
        }
    }
    Ok(())
}

/// Validate `name` and return its canonical shared-object form,
/// `/kstate.<name>`.
pub fn canonical_name(caller: &str, name: &str) -> Result<String> {
    validate_name(caller, name)?;
    Ok(format!("{PREFIX}{name}"))
}

/// Strip the canonical prefix back off, for presenting a name to a caller.
/// Panics if `canonical` was not produced by [`canonical_name`]; this is an
/// internal helper, never fed untrusted input.
pub fn user_name(canonical: &str) -> &str {
    canonical
        .strip_prefix(PREFIX)
        .expect("canonical state name always carries the kstate prefix")
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn accepts_plain_names() {
        assert!(validate_name("test", "Fred").is_ok());
        assert!(validate_name("test", "Fred.Jim").is_ok());
    }

    #[test]
    fn rejects_leading_or_trailing_dot() {
        assert!(validate_name("test", ".Fred").is_err());
        assert!(validate_name("test", "Fred.").is_err());
    }

    #[test]
    fn rejects_adjacent_dots() {
        assert!(validate_name("test", "Fred..Jim").is_err());
    }

    #[test]
    fn rejects_non_alphanumeric() {
        assert!(validate_name("test", "Fred&Jim").is_err());
    }

    #[test]
    fn boundary_lengths() {
        let max = max_name_len();
        let ok = "a".repeat(max);
        let too_long = "a".repeat(max + 1);
        assert!(validate_name("test", &ok).is_ok());
        assert!(validate_name("test", &too_long).is_err());
    }

    #[test]
    fn canonical_round_trips() {
        let canonical = canonical_name("test", "Fred").unwrap();
        assert_eq!(canonical, "/kstate.Fred");
        assert_eq!(user_name(&canonical), "Fred");
    }
}
