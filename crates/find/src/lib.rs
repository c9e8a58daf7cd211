//! The `find` expression language: tokenized arguments compiled onto
//! the shared query core. Arguments are `[path] [options] [expression]`.

pub mod expression;
pub mod meta;
pub mod primaries;

use expression::Parser;
use plugin::Error;
use primaries::FindGrammar;
use rql::{Expr, Primary, Query};
use time::OffsetDateTime;

/// Traversal options accepted ahead of the expression.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Options {
    pub min_depth: Option<usize>,
    pub max_depth: Option<usize>,
}

/// A fully parsed `find` invocation.
#[derive(Debug)]
pub struct Parsed {
    /// The start path, when one was given.
    pub path: Option<String>,
    pub options: Options,
    pub query: Query,
}

/// Parses `find`'s arguments. `reference` anchors duration predicates
/// (`-m .expiry +1h`); callers pass the invocation time.
pub fn parse(args: &[String], reference: OffsetDateTime) -> Result<Parsed, Error> {
    let (path, rest) = split_path(args);
    let (options, rest) = parse_options(rest)?;
    let query = parse_expression(rest, reference)?;
    Ok(Parsed {
        path,
        options,
        query,
    })
}

/// The leading argument is a path unless it looks like the start of an
/// expression.
fn split_path(args: &[String]) -> (Option<String>, &[String]) {
    match args.first() {
        Some(first)
            if !first.starts_with('-') && first != "(" && first != ")" && first != "!" =>
        {
            (Some(first.clone()), &args[1..])
        }
        _ => (None, args),
    }
}

fn parse_options(mut args: &[String]) -> Result<(Options, &[String]), Error> {
    let mut options = Options::default();
    loop {
        match args.first().map(String::as_str) {
            Some(option @ ("-maxdepth" | "-mindepth")) => {
                let Some(value) = args.get(1) else {
                    return Err(Error::SyntaxError(format!(
                        "{option}: requires additional arguments"
                    )));
                };
                let depth: usize = value.parse().map_err(|_| {
                    Error::SyntaxError(format!(
                        "{option}: {value} is not a non-negative integer"
                    ))
                })?;
                if option == "-maxdepth" {
                    options.max_depth = Some(depth);
                } else {
                    options.min_depth = Some(depth);
                }
                args = &args[2..];
            }
            _ => return Ok((options, args)),
        }
    }
}

fn parse_expression(args: &[String], reference: OffsetDateTime) -> Result<Query, Error> {
    if args.is_empty() {
        return Ok(Expr::Atom(Primary::Boolean(true)));
    }
    let grammar = FindGrammar { reference };
    let partial = Parser::new(&grammar).parse(args)?;
    if let Some(error) = partial.error {
        return Err(error);
    }
    match partial.predicate {
        Some(query) => Ok(query),
        None => Ok(Expr::Atom(Primary::Boolean(true))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn args(raw: &str) -> Vec<String> {
        raw.split_whitespace().map(String::from).collect()
    }

    fn reference() -> OffsetDateTime {
        datetime!(2020-01-02 00:00:00 UTC)
    }

    #[test]
    fn splits_path_options_and_expression() {
        let parsed = parse(
            &args("docker/containers -maxdepth 3 -name web*"),
            reference(),
        )
        .unwrap();
        assert_eq!(parsed.path.as_deref(), Some("docker/containers"));
        assert_eq!(parsed.options.max_depth, Some(3));
        assert_eq!(
            parsed.query.marshal(),
            serde_json::json!(["name", ["glob", "web*"]])
        );
    }

    #[test]
    fn everything_is_optional() {
        let parsed = parse(&[], reference()).unwrap();
        assert_eq!(parsed.path, None);
        assert_eq!(parsed.options, Options::default());
        assert_eq!(parsed.query.marshal(), serde_json::json!(true));
    }

    #[test]
    fn expression_without_a_path() {
        let parsed = parse(&args("-action exec"), reference()).unwrap();
        assert_eq!(parsed.path, None);
        assert_eq!(
            parsed.query.marshal(),
            serde_json::json!(["action", "exec"])
        );
    }

    #[test]
    fn unknown_tokens_are_reported() {
        let err = parse(&args("-name foo bar"), reference()).unwrap_err();
        assert_eq!(err, Error::UnknownToken("bar".to_string()));
    }

    #[test]
    fn malformed_options_are_syntax_errors() {
        let err = parse(&args("-maxdepth x"), reference()).unwrap_err();
        assert!(matches!(err, Error::SyntaxError(_)), "got {err:?}");
    }
}
