use crate::expr::Atom;
use globset::{Glob, GlobMatcher};
use plugin::Error;
use serde_json::Value;

/// A predicate on strings: equality, shell glob, or regex.
/// `["=", s]`, `["glob", g]`, `["regex", r]`.
#[derive(Debug, Clone)]
pub enum StringAtom {
    Eq(String),
    Glob { pattern: String, matcher: GlobMatcher },
    Regex { pattern: String, re: regex::Regex },
}

impl StringAtom {
    pub fn eq(literal: impl Into<String>) -> Self {
        StringAtom::Eq(literal.into())
    }

    pub fn glob(pattern: &str) -> Result<Self, Error> {
        let matcher = Glob::new(pattern)
            .map_err(|err| Error::SyntaxError(format!("invalid glob: {err}")))?
            .compile_matcher();
        Ok(StringAtom::Glob {
            pattern: pattern.to_string(),
            matcher,
        })
    }

    pub fn regex(pattern: &str) -> Result<Self, Error> {
        let re = regex::Regex::new(pattern)
            .map_err(|err| Error::SyntaxError(format!("invalid regex: {err}")))?;
        Ok(StringAtom::Regex {
            pattern: pattern.to_string(),
            re,
        })
    }

    pub fn eval(&self, value: &str) -> bool {
        match self {
            StringAtom::Eq(literal) => value == literal,
            StringAtom::Glob { matcher, .. } => matcher.is_match(value),
            StringAtom::Regex { re, .. } => re.is_match(value),
        }
    }
}

// Compiled matchers compare by their pattern.
impl PartialEq for StringAtom {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (StringAtom::Eq(a), StringAtom::Eq(b)) => a == b,
            (StringAtom::Glob { pattern: a, .. }, StringAtom::Glob { pattern: b, .. }) => a == b,
            (StringAtom::Regex { pattern: a, .. }, StringAtom::Regex { pattern: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Atom for StringAtom {
    fn marshal(&self) -> Value {
        let (tag, pattern) = match self {
            StringAtom::Eq(literal) => ("=", literal.as_str()),
            StringAtom::Glob { pattern, .. } => ("glob", pattern.as_str()),
            StringAtom::Regex { pattern, .. } => ("regex", pattern.as_str()),
        };
        Value::Array(vec![Value::from(tag), Value::from(pattern)])
    }

    fn unmarshal(value: &Value) -> Result<Self, Error> {
        let Value::Array(items) = value else {
            return Err(Error::MatchError(
                "must be formatted as [\"=\" | \"glob\" | \"regex\", <string>]".to_string(),
            ));
        };
        let Some(tag @ ("=" | "glob" | "regex")) = items.first().and_then(Value::as_str) else {
            return Err(Error::MatchError(
                "must be formatted as [\"=\" | \"glob\" | \"regex\", <string>]".to_string(),
            ));
        };
        if items.len() != 2 {
            return Err(Error::SyntaxError(format!(
                "{tag} must be formatted as [\"{tag}\", <string>]"
            )));
        }
        let Some(pattern) = items[1].as_str() else {
            return Err(Error::SyntaxError(format!(
                "{tag}: expected a string, got {}",
                items[1]
            )));
        };
        match tag {
            "=" => Ok(StringAtom::eq(pattern)),
            "glob" => StringAtom::glob(pattern),
            _ => StringAtom::regex(pattern),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_globs_and_regexes() {
        assert!(StringAtom::eq("x86_64").eval("x86_64"));
        assert!(!StringAtom::eq("x86_64").eval("x86_6"));

        let glob = StringAtom::glob("*/container").unwrap();
        assert!(glob.eval("docker/containers/container"));
        assert!(!glob.eval("docker/volumes/volume"));

        let re = StringAtom::regex("^web-[0-9]+$").unwrap();
        assert!(re.eval("web-12"));
        assert!(!re.eval("web-"));
    }

    #[test]
    fn round_trips() {
        for raw in [
            serde_json::json!(["=", "foo"]),
            serde_json::json!(["glob", "foo*"]),
            serde_json::json!(["regex", "^foo$"]),
        ] {
            let parsed = StringAtom::unmarshal(&raw).unwrap();
            assert_eq!(parsed.marshal(), raw);
        }
    }

    #[test]
    fn invalid_globs_are_syntax_errors() {
        let err = StringAtom::unmarshal(&serde_json::json!(["glob", "[a"])).unwrap_err();
        assert!(matches!(err, Error::SyntaxError(_)), "got {err:?}");
    }

    #[test]
    fn other_shapes_are_match_errors() {
        let err = StringAtom::unmarshal(&serde_json::json!(["~", "x"])).unwrap_err();
        assert!(err.is_match_error(), "got {err:?}");
    }
}
