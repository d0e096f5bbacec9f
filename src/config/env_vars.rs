use std::path::PathBuf;

/// Expand `$VAR` and `${VAR}` references in a configured path.
///
/// Unset `$VAR` references are kept verbatim so the resulting error message
/// still names the variable; unset `${VAR}` references expand to nothing.
pub fn expand_env_vars(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => {
                    let name = &braced[..end];
                    result.push_str(&std::env::var(name).unwrap_or_default());
                    rest = &braced[end + 1..];
                }
                None => {
                    result.push_str(&rest[pos..]);
                    rest = "";
                }
            }
            continue;
        }

        let name_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        let name = &after[..name_len];
        match std::env::var(name) {
            Ok(val) if !name.is_empty() => result.push_str(&val),
            _ => {
                result.push('$');
                result.push_str(name);
            }
        }
        rest = &after[name_len..];
    }

    result.push_str(rest);
    result
}

/// Expand environment variables and a leading `~` into a path.
pub fn expand_path(value: &str) -> PathBuf {
    let expanded = expand_env_vars(value);
    if expanded == "~" || expanded.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(format!("{}{}", home, &expanded[1..]));
        }
    }
    PathBuf::from(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_dollar_and_brace_styles() {
        env::set_var("UPLINK_TEST_ROOT", "/srv/uplink");
        env::set_var("UPLINK_TEST_STUDY", "s1");

        assert_eq!(expand_env_vars("$UPLINK_TEST_ROOT/plain"), "/srv/uplink/plain");
        assert_eq!(expand_env_vars("${UPLINK_TEST_ROOT}/plain"), "/srv/uplink/plain");
        assert_eq!(
            expand_env_vars("$UPLINK_TEST_ROOT/${UPLINK_TEST_STUDY}-queue"),
            "/srv/uplink/s1-queue"
        );

        env::remove_var("UPLINK_TEST_ROOT");
        env::remove_var("UPLINK_TEST_STUDY");
    }

    #[test]
    fn test_unset_variables() {
        assert_eq!(expand_env_vars("$UPLINK_TEST_UNSET/x"), "$UPLINK_TEST_UNSET/x");
        assert_eq!(expand_env_vars("${UPLINK_TEST_UNSET}/x"), "/x");
    }

    #[test]
    fn test_malformed_references_left_alone() {
        assert_eq!(expand_env_vars("$"), "$");
        assert_eq!(expand_env_vars("$$"), "$$");
        assert_eq!(expand_env_vars("${open"), "${open");
        assert_eq!(expand_env_vars("cost: $5"), "cost: $5");
    }

    #[test]
    fn test_name_ends_at_punctuation() {
        env::set_var("UPLINK_TEST_NAME", "value");
        assert_eq!(expand_env_vars("$UPLINK_TEST_NAME-1"), "value-1");
        assert_eq!(expand_env_vars("$UPLINK_TEST_NAME_1"), "$UPLINK_TEST_NAME_1");
        env::remove_var("UPLINK_TEST_NAME");
    }

    #[test]
    fn test_tilde_expansion() {
        let home = env::var("HOME").unwrap_or_default();
        if home.is_empty() {
            return;
        }
        assert_eq!(expand_path("~/uplink"), PathBuf::from(format!("{}/uplink", home)));
        assert_eq!(expand_path("/abs/~/x"), PathBuf::from("/abs/~/x"));
    }
}
