use serde::{Deserialize, Serialize};

use crate::error::SelectorError;

/// A recognized selector key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermKey {
    Id,
    Role,
    Text,
    Label,
    Value,
    Visible,
    Hidden,
    Editable,
    Selected,
    Enabled,
    Hittable,
}

impl TermKey {
    fn parse(s: &str) -> Option<TermKey> {
        Some(match s {
            "id" => TermKey::Id,
            "role" => TermKey::Role,
            "text" => TermKey::Text,
            "label" => TermKey::Label,
            "value" => TermKey::Value,
            "visible" => TermKey::Visible,
            "hidden" => TermKey::Hidden,
            "editable" => TermKey::Editable,
            "selected" => TermKey::Selected,
            "enabled" => TermKey::Enabled,
            "hittable" => TermKey::Hittable,
            _ => return None,
        })
    }

    fn is_boolean(self) -> bool {
        matches!(
            self,
            TermKey::Visible
                | TermKey::Hidden
                | TermKey::Editable
                | TermKey::Selected
                | TermKey::Enabled
                | TermKey::Hittable
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TermKey::Id => "id",
            TermKey::Role => "role",
            TermKey::Text => "text",
            TermKey::Label => "label",
            TermKey::Value => "value",
            TermKey::Visible => "visible",
            TermKey::Hidden => "hidden",
            TermKey::Editable => "editable",
            TermKey::Selected => "selected",
            TermKey::Enabled => "enabled",
            TermKey::Hittable => "hittable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TermValue {
    Str(String),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub key: TermKey,
    pub value: TermValue,
}

/// One `||`-joined segment: a whitespace-separated conjunction of terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selector {
    pub raw: String,
    pub terms: Vec<Term>,
}

/// A full selector expression: an ordered list of fallback selectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorChain {
    pub raw: String,
    pub selectors: Vec<Selector>,
}

/// Splits `raw` into whitespace-delimited tokens, treating `"..."`/`'...'`
/// as opaque (whitespace inside is preserved) and preserving backslash
/// escapes verbatim rather than interpreting them.
fn tokenize(raw: &str) -> Result<Vec<String>, SelectorError> {
    let chars: Vec<char> = raw.chars().collect();
    let n = chars.len();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < n {
        while i < n && chars[i].is_whitespace() {
            i += 1;
        }
        if i >= n {
            break;
        }

        let mut token = String::new();
        let mut quote: Option<char> = None;
        while i < n {
            let c = chars[i];
            if let Some(q) = quote {
                if c == '\\' && i + 1 < n {
                    token.push(c);
                    token.push(chars[i + 1]);
                    i += 2;
                    continue;
                }
                token.push(c);
                i += 1;
                if c == q {
                    quote = None;
                }
                continue;
            }
            if c.is_whitespace() {
                break;
            }
            if c == '"' || c == '\'' {
                quote = Some(c);
                token.push(c);
                i += 1;
                continue;
            }
            token.push(c);
            i += 1;
        }

        if quote.is_some() {
            return Err(SelectorError::UnclosedQuote);
        }
        tokens.push(token);
    }

    Ok(tokens)
}

/// Strips a single layer of matching `"`/`'` quoting from a value token,
/// leaving any backslash escapes inside untouched.
fn unquote(value: &str) -> Result<String, SelectorError> {
    let mut chars = value.chars();
    match (chars.next(), value.chars().last()) {
        (Some(first), Some(last)) if (first == '"' || first == '\'') && first == last && value.len() >= 2 =>
        {
            Ok(value[1..value.len() - 1].to_string())
        }
        _ => Ok(value.to_string()),
    }
}

fn parse_bool(raw: &str) -> Result<bool, SelectorError> {
    if raw.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if raw.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(SelectorError::UnparseableBoolean(raw.to_string()))
    }
}

fn parse_term(token: &str) -> Result<Term, SelectorError> {
    if let Some(eq_pos) = token.find('=') {
        let key_str = &token[..eq_pos];
        let value_str = &token[eq_pos + 1..];
        let key =
            TermKey::parse(key_str).ok_or_else(|| SelectorError::UnknownKey(key_str.to_string()))?;
        if value_str.is_empty() {
            return Err(SelectorError::MissingValue(key_str.to_string()));
        }
        let raw_value = unquote(value_str)?;
        if key.is_boolean() {
            let b = parse_bool(&raw_value)?;
            Ok(Term {
                key,
                value: TermValue::Bool(b),
            })
        } else {
            Ok(Term {
                key,
                value: TermValue::Str(raw_value),
            })
        }
    } else {
        let key = TermKey::parse(token).ok_or_else(|| SelectorError::UnknownKey(token.to_string()))?;
        if !key.is_boolean() {
            return Err(SelectorError::MissingValue(token.to_string()));
        }
        Ok(Term {
            key,
            value: TermValue::Bool(true),
        })
    }
}

fn build_selector(tokens: &[String]) -> Result<Selector, SelectorError> {
    if tokens.is_empty() {
        return Err(SelectorError::EmptySegment);
    }
    let terms = tokens
        .iter()
        .map(|t| parse_term(t))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Selector {
        raw: tokens.join(" "),
        terms,
    })
}

/// Parses a full selector chain expression, e.g.
/// `id="auth_continue" || role="button" label="Continue"`.
pub fn parse_chain(raw: &str) -> Result<SelectorChain, SelectorError> {
    if raw.trim().is_empty() {
        return Err(SelectorError::EmptyInput);
    }

    let tokens = tokenize(raw)?;
    if tokens.is_empty() {
        return Err(SelectorError::EmptyInput);
    }

    let mut selectors = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for token in tokens {
        if token == "||" {
            selectors.push(build_selector(&current)?);
            current = Vec::new();
        } else {
            current.push(token);
        }
    }
    selectors.push(build_selector(&current)?);

    Ok(SelectorChain {
        raw: raw.to_string(),
        selectors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_quoted_term() {
        let chain = parse_chain(r#"label="Continue""#).unwrap();
        assert_eq!(chain.selectors.len(), 1);
        assert_eq!(chain.selectors[0].terms.len(), 1);
        assert_eq!(chain.selectors[0].terms[0].key, TermKey::Label);
        assert_eq!(
            chain.selectors[0].terms[0].value,
            TermValue::Str("Continue".to_string())
        );
    }

    #[test]
    fn parses_fallback_chain_with_multiple_segments() {
        let chain = parse_chain(r#"id="auth_continue" || label="Continue""#).unwrap();
        assert_eq!(chain.selectors.len(), 2);
        assert_eq!(chain.selectors[0].terms[0].key, TermKey::Id);
        assert_eq!(chain.selectors[1].terms[0].key, TermKey::Label);
    }

    #[test]
    fn parses_multi_term_segment_as_conjunction() {
        let chain = parse_chain(r#"role="button" label="Continue""#).unwrap();
        assert_eq!(chain.selectors.len(), 1);
        assert_eq!(chain.selectors[0].terms.len(), 2);
    }

    #[test]
    fn boolean_key_without_value_is_implicit_true() {
        let chain = parse_chain("visible").unwrap();
        assert_eq!(
            chain.selectors[0].terms[0].value,
            TermValue::Bool(true)
        );
    }

    #[test]
    fn boolean_key_accepts_explicit_value() {
        let chain = parse_chain("editable=false").unwrap();
        assert_eq!(
            chain.selectors[0].terms[0].value,
            TermValue::Bool(false)
        );
    }

    #[test]
    fn rejects_empty_input() {
        assert_eq!(parse_chain(""), Err(SelectorError::EmptyInput));
        assert_eq!(parse_chain("   "), Err(SelectorError::EmptyInput));
    }

    #[test]
    fn rejects_empty_segment() {
        assert_eq!(
            parse_chain(r#"label="Continue" || "#),
            Err(SelectorError::EmptySegment)
        );
        assert_eq!(
            parse_chain(r#" || label="Continue""#),
            Err(SelectorError::EmptySegment)
        );
    }

    #[test]
    fn rejects_unknown_key() {
        assert_eq!(
            parse_chain("bogus=1"),
            Err(SelectorError::UnknownKey("bogus".to_string()))
        );
    }

    #[test]
    fn rejects_unclosed_quote() {
        assert_eq!(parse_chain(r#"label="Continue"#), Err(SelectorError::UnclosedQuote));
    }

    #[test]
    fn rejects_missing_value_for_text_key() {
        assert_eq!(
            parse_chain("label="),
            Err(SelectorError::MissingValue("label".to_string()))
        );
        assert_eq!(
            parse_chain("label"),
            Err(SelectorError::MissingValue("label".to_string()))
        );
    }

    #[test]
    fn rejects_unparseable_boolean_value() {
        assert_eq!(
            parse_chain("visible=yes"),
            Err(SelectorError::UnparseableBoolean("yes".to_string()))
        );
    }

    #[test]
    fn preserves_backslash_escapes_in_quoted_value() {
        let chain = parse_chain(r#"label="say \"hi\"""#).unwrap();
        assert_eq!(
            chain.selectors[0].terms[0].value,
            TermValue::Str(r#"say \"hi\""#.to_string())
        );
    }
}
