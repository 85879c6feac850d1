//! Tokenizer for rule text entries.
//!
//! ```text
//! CATEGORY:[NAME@]TOKEN[,TOKEN...]
//!
//! TOKEN := PATTERN                    include
//!        | !PATTERN                   exclude
//!        | ~PATTERN~REPLACEMENT~      rewrite, stop on match
//!        | =PATTERN=REPLACEMENT=      rewrite, continue on match
//! ```
//!
//! Inside a rewrite token the delimiter may be escaped as `\~` / `\=`.
//! Inside a plain token a comma may be escaped as `\,`. Every other
//! backslash sequence is passed through untouched so regex escapes survive.

use std::iter::Peekable;
use std::str::Chars;

use crate::error::PatternError;

/// Category spellings that mark a rule as a rewrite collection.
const REPLACEMENT_SUFFIXES: &[&str] = &["-replacement", "-replace", "-rp"];

/// One token of a rule body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    Include(String),
    Exclude(String),
    Rewrite {
        pattern: String,
        replacement: String,
        continues: bool,
    },
}

/// A rule text split into its header parts.
#[derive(Debug)]
pub(crate) struct RuleText<'a> {
    pub category: String,
    pub replacement: bool,
    pub name: Option<&'a str>,
    pub body: &'a str,
}

/// Lowercases a category and strips a replacement suffix.
///
/// Returns the bare category and whether a suffix was present.
pub(crate) fn normalize_category(raw: &str) -> (String, bool) {
    let lowered = raw.trim().to_ascii_lowercase();
    for suffix in REPLACEMENT_SUFFIXES {
        if let Some(stripped) = lowered.strip_suffix(suffix) {
            if !stripped.is_empty() {
                return (stripped.to_string(), true);
            }
        }
    }
    (lowered, false)
}

/// Splits `CATEGORY:[NAME@]BODY`.
pub(crate) fn split_rule(text: &str) -> Result<RuleText<'_>, PatternError> {
    let trimmed = text.trim();
    let missing = || PatternError::MissingCategory {
        text: text.to_string(),
    };

    let (raw_category, body) = trimmed.split_once(':').ok_or_else(missing)?;
    let valid_category = !raw_category.trim().is_empty()
        && raw_category
            .trim()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid_category {
        return Err(missing());
    }

    let (category, replacement) = normalize_category(raw_category);
    let (name, body) = split_name(body);
    Ok(RuleText {
        category,
        replacement,
        name,
        body,
    })
}

fn split_name(body: &str) -> (Option<&str>, &str) {
    let body = body.trim_start();
    if body.starts_with(['!', '~', '=']) {
        return (None, body);
    }
    if let Some(idx) = body.find('@') {
        let name = body[..idx].trim();
        if !name.is_empty() && !name.contains([',', '~', '=', '\\']) {
            return (Some(name), &body[idx + 1..]);
        }
    }
    (None, body)
}

/// Splits a rule body into tokens.
///
/// `replacement` marks a rewrite collection: unmarked tokens are read as
/// `PATTERN~REPLACEMENT` (trailing `~` optional, missing replacement means
/// the match is deleted).
pub(crate) fn tokenize(
    body: &str,
    replacement: bool,
    text: &str,
) -> Result<Vec<Token>, PatternError> {
    let mut tokens = Vec::new();
    let mut chars = body.chars().peekable();

    loop {
        skip_whitespace(&mut chars);
        let Some(&first) = chars.peek() else { break };
        match first {
            ',' => {
                chars.next();
            }
            '~' | '=' => {
                chars.next();
                let unterminated = || PatternError::Unterminated {
                    text: text.to_string(),
                    delimiter: first,
                };
                let (pattern, closed) = read_until(&mut chars, first);
                if !closed {
                    return Err(unterminated());
                }
                let (replacement, closed) = read_until(&mut chars, first);
                if !closed {
                    return Err(unterminated());
                }
                tokens.push(Token::Rewrite {
                    pattern,
                    replacement,
                    continues: first == '=',
                });
                skip_whitespace(&mut chars);
                match chars.next() {
                    None | Some(',') => {}
                    Some(_) => {
                        return Err(PatternError::TrailingInput {
                            text: text.to_string(),
                        })
                    }
                }
            }
            _ => {
                let raw = read_plain(&mut chars);
                let raw = raw.trim();
                if !raw.is_empty() {
                    tokens.push(plain_token(raw, replacement));
                }
            }
        }
    }

    Ok(tokens)
}

fn plain_token(raw: &str, replacement: bool) -> Token {
    if let Some(rest) = raw.strip_prefix('!') {
        return Token::Exclude(rest.to_string());
    }
    if replacement {
        let mut chars = raw.chars().peekable();
        let (pattern, _) = read_until(&mut chars, '~');
        let (replacement, _) = read_until(&mut chars, '~');
        return Token::Rewrite {
            pattern,
            replacement,
            continues: false,
        };
    }
    Token::Include(raw.to_string())
}

fn skip_whitespace(chars: &mut Peekable<Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

/// Reads up to the next unescaped `delimiter` and consumes it.
///
/// The flag is `false` when input ran out before a delimiter was found.
fn read_until(chars: &mut Peekable<Chars<'_>>, delimiter: char) -> (String, bool) {
    let mut out = String::new();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some(&next) if next == delimiter => {
                    out.push(next);
                    chars.next();
                }
                Some(&next) => {
                    out.push('\\');
                    out.push(next);
                    chars.next();
                }
                None => out.push('\\'),
            }
        } else if c == delimiter {
            return (out, true);
        } else {
            out.push(c);
        }
    }
    (out, false)
}

fn read_plain(chars: &mut Peekable<Chars<'_>>) -> String {
    let (out, _) = read_until(chars, ',');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(body: &str) -> Vec<Token> {
        tokenize(body, false, body).expect("tokenize")
    }

    #[test]
    fn plain_include_and_exclude() {
        assert_eq!(
            toks("main, !release/.*"),
            vec![
                Token::Include("main".into()),
                Token::Exclude("release/.*".into())
            ]
        );
    }

    #[test]
    fn rewrite_tokens_carry_continue_flag() {
        assert_eq!(
            toks("~^v~~,=a=b="),
            vec![
                Token::Rewrite {
                    pattern: "^v".into(),
                    replacement: String::new(),
                    continues: false
                },
                Token::Rewrite {
                    pattern: "a".into(),
                    replacement: "b".into(),
                    continues: true
                },
            ]
        );
    }

    #[test]
    fn escaped_delimiter_stays_in_pattern() {
        assert_eq!(
            toks(r"~a\~b~c~"),
            vec![Token::Rewrite {
                pattern: "a~b".into(),
                replacement: "c".into(),
                continues: false
            }]
        );
    }

    #[test]
    fn regex_escapes_survive() {
        assert_eq!(toks(r"^\d+\.x"), vec![Token::Include(r"^\d+\.x".into())]);
    }

    #[test]
    fn escaped_comma_in_plain_token() {
        assert_eq!(toks(r"a{1\,3}"), vec![Token::Include("a{1,3}".into())]);
    }

    #[test]
    fn unterminated_rewrite_is_an_error() {
        let err = tokenize("~abc~def", false, "x:~abc~def").unwrap_err();
        assert!(matches!(err, PatternError::Unterminated { delimiter: '~', .. }));
    }

    #[test]
    fn garbage_after_rewrite_is_an_error() {
        let err = tokenize("~a~b~c", false, "x").unwrap_err();
        assert!(matches!(err, PatternError::TrailingInput { .. }));
    }

    #[test]
    fn replacement_category_reads_unmarked_tokens_as_rewrites() {
        assert_eq!(
            tokenize("release/(.*)~r/\\1", true, "t").expect("tokenize"),
            vec![Token::Rewrite {
                pattern: "release/(.*)".into(),
                replacement: "r/\\1".into(),
                continues: false
            }]
        );
    }

    #[test]
    fn split_rule_reads_name_key() {
        let rule = split_rule("revision:kernel/.*@main,dev").expect("split");
        assert_eq!(rule.category, "revision");
        assert_eq!(rule.name, Some("kernel/.*"));
        assert_eq!(rule.body, "main,dev");
    }

    #[test]
    fn split_rule_strips_replacement_suffix() {
        let rule = split_rule("Revision-RP:^v").expect("split");
        assert_eq!(rule.category, "revision");
        assert!(rule.replacement);
        assert_eq!(rule.name, None);
    }

    #[test]
    fn split_rule_rejects_missing_category() {
        assert!(split_rule("release/.*").is_err());
        assert!(split_rule("^a(b:c)").is_err());
    }
}
