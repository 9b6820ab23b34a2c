const KNOWN_KEYS: &[&str] = &[
    "id", "role", "text", "label", "value", "visible", "hidden", "editable", "selected",
    "enabled", "hittable",
];

fn looks_like_selector_token(token: &str) -> bool {
    if token == "||" {
        return true;
    }
    let key_part = token.split('=').next().unwrap_or(token);
    KNOWN_KEYS.contains(&key_part)
}

/// Identifies the longest leading run of tokens that look like selector
/// syntax (a known key, `key=value`, or `||`) and splits them from the rest.
///
/// When `prefer_trailing_value` is set and the whole argument list would
/// otherwise be consumed (leaving nothing for a trailing value argument),
/// the last selector-looking token is deferred back to the remainder.
pub fn split_selector_from_args(
    args: &[String],
    prefer_trailing_value: bool,
) -> (Vec<String>, Vec<String>) {
    let mut split_at = 0;
    for token in args {
        if looks_like_selector_token(token) {
            split_at += 1;
        } else {
            break;
        }
    }

    if prefer_trailing_value && split_at == args.len() && split_at > 0 {
        split_at -= 1;
    }

    let (selector_tokens, rest) = args.split_at(split_at);
    (selector_tokens.to_vec(), rest.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn splits_selector_prefix_from_trailing_value() {
        let args = v(&["label=Name", "New Value"]);
        let (selector, rest) = split_selector_from_args(&args, false);
        assert_eq!(selector, v(&["label=Name"]));
        assert_eq!(rest, v(&["New Value"]));
    }

    #[test]
    fn stops_at_first_non_selector_token() {
        let args = v(&["role=button", "||", "label=Go", "Submit Form"]);
        let (selector, rest) = split_selector_from_args(&args, false);
        assert_eq!(selector, v(&["role=button", "||", "label=Go"]));
        assert_eq!(rest, v(&["Submit Form"]));
    }

    #[test]
    fn prefer_trailing_value_gives_back_the_last_token_when_nothing_would_remain() {
        let args = v(&["label=Name"]);
        let (selector, rest) = split_selector_from_args(&args, true);
        assert!(selector.is_empty());
        assert_eq!(rest, v(&["label=Name"]));
    }

    #[test]
    fn prefer_trailing_value_is_a_no_op_when_a_trailing_value_already_exists() {
        let args = v(&["label=Name", "New Value"]);
        let (selector, rest) = split_selector_from_args(&args, true);
        assert_eq!(selector, v(&["label=Name"]));
        assert_eq!(rest, v(&["New Value"]));
    }

    #[test]
    fn empty_args_yield_empty_split() {
        let args: Vec<String> = Vec::new();
        let (selector, rest) = split_selector_from_args(&args, true);
        assert!(selector.is_empty());
        assert!(rest.is_empty());
    }
}
