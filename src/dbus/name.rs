//! D-Bus bus name grammar.
//!
//! A well-known bus name is a dot-separated sequence of at least two
//! segments. Each segment starts with an ASCII letter, `_` or `-` and
//! continues with ASCII letters, digits, `_` or `-`. The whole name is at
//! most 255 bytes.
//!
//! Filter rules may also name a prefix: `org.freedesktop.*` matches the
//! prefix and everything below it. The `*` must start a segment and be the
//! last character.

/// Maximum length of a bus name in bytes.
pub const MAX_NAME_LENGTH: usize = 255;

/// Check whether `name` is a valid bus name or prefix wildcard.
pub fn check_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > MAX_NAME_LENGTH {
        return false;
    }

    let mut segments = 1;
    let mut in_segment = false;

    for (idx, &c) in bytes.iter().enumerate() {
        if in_segment {
            if c == b'.' {
                segments += 1;
                in_segment = false;
            } else if !(c.is_ascii_alphanumeric() || c == b'_' || c == b'-') {
                return false;
            }
        } else {
            if c == b'*' {
                // A wildcard needs a completed segment in front of it.
                return idx > 0 && idx + 1 == bytes.len();
            }
            if !(c.is_ascii_alphabetic() || c == b'_' || c == b'-') {
                return false;
            }
            in_segment = true;
        }
    }

    in_segment && segments >= 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(check_name("org.freedesktop.DBus"));
        assert!(check_name("org.mpris.MediaPlayer2.vlc"));
        assert!(check_name("_a.-b"));
        assert!(check_name("com.example-app.Service_1"));
    }

    #[test]
    fn test_wildcards() {
        assert!(check_name("org.*"));
        assert!(check_name("org.freedesktop.*"));
        assert!(!check_name("*"));
        assert!(!check_name("org.Bus*"));
        assert!(!check_name("org.*.Bus"));
        assert!(!check_name("org.**"));
    }

    #[test]
    fn test_segment_rules() {
        assert!(!check_name("org"));
        assert!(!check_name("org..Bus"));
        assert!(!check_name("org.Bus."));
        assert!(!check_name(".org.Bus"));
        assert!(!check_name("org.1Bus"));
        assert!(!check_name("org.Bus!"));
        assert!(!check_name("org.Büs"));
    }

    #[test]
    fn test_length_limits() {
        assert!(!check_name(""));

        let max = format!("a.{}", "b".repeat(MAX_NAME_LENGTH - 2));
        assert_eq!(max.len(), MAX_NAME_LENGTH);
        assert!(check_name(&max));

        let too_long = format!("a.{}", "b".repeat(MAX_NAME_LENGTH - 1));
        assert_eq!(too_long.len(), 256);
        assert!(!check_name(&too_long));
    }
}
