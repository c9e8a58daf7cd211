//! The `-meta` primary's predicate grammar:
//!
//! ```text
//! Predicate => ObjectPredicate | ArrayPredicate | PrimitivePredicate
//! ObjectPredicate => '.' Key NestedPredicate
//! ArrayPredicate  => '[' some | all | <n> ']' NestedPredicate
//! NestedPredicate => Predicate | '(' Expression ')'
//! PrimitivePredicate => '-empty' | Duration | Numeric | String
//! ```
//!
//! Durations take an optional +/- prefix and optional `{...}`
//! bracketing; bracketing bases the comparison off `value - reference`
//! instead of `reference - value`. Numerics take an optional +/-
//! prefix (greater-than / less-than). A string is any token not
//! starting with '-'.

use crate::expression::{Grammar, Parser, Partial};
use bigdecimal::BigDecimal;
use plugin::Error;
use rql::{
    ComparisonOp, Expr, NumericAtom, Selector, StringAtom, TimeAtom, ValueExpr, ValuePredicate,
};
use std::str::FromStr;
use time::OffsetDateTime;

pub struct MetaGrammar {
    /// The reference instant duration predicates compare against;
    /// set once when the query is parsed.
    pub reference: OffsetDateTime,
}

impl Grammar for MetaGrammar {
    type Primary = ValuePredicate;

    fn parse_primary(&self, tokens: &[String]) -> Result<Partial<ValuePredicate>, Error> {
        let (expr, rest) = self.parse_predicate(tokens)?;
        Ok(Partial {
            predicate: Some(expr),
            rest,
            error: None,
        })
    }

    fn negate(&self, expr: ValueExpr) -> ValueExpr {
        negate_value_expr(expr)
    }
}

/// Negation of a meta predicate: atoms that carry their own negation
/// semantics (-empty, durations) negate in place; everything else gets
/// the domain-preserving NOT.
pub fn negate_value_expr(expr: ValueExpr) -> ValueExpr {
    if let Expr::Atom(atom) = &expr {
        if let Some(negated) = atom.negated() {
            return Expr::Atom(negated);
        }
    }
    Expr::not(expr)
}

impl MetaGrammar {
    fn parse_predicate(&self, tokens: &[String]) -> Result<(ValueExpr, Vec<String>), Error> {
        let Some(token) = tokens.first() else {
            return Err(Error::MatchError(
                "expected either a primitive, object, or array predicate".to_string(),
            ));
        };
        if token.starts_with('.') {
            return self.parse_object_predicate(tokens);
        }
        if token.starts_with('[') {
            return self.parse_array_predicate(tokens);
        }
        self.parse_primitive_predicate(tokens)
    }

    fn parse_object_predicate(&self, tokens: &[String]) -> Result<(ValueExpr, Vec<String>), Error> {
        let token = &tokens[0];
        let chain = &token[1..];
        let split = chain.find(|c| c == '.' || c == '[').unwrap_or(chain.len());
        let (key, remainder) = chain.split_at(split);
        if key.is_empty() {
            return Err(Error::SyntaxError(format!(
                "expected a key sequence after '.', got {token}"
            )));
        }
        let (inner, rest) = self.parse_nested(remainder, &tokens[1..], key)?;
        Ok((
            Expr::Atom(ValuePredicate::object_element(key, inner)),
            rest,
        ))
    }

    fn parse_array_predicate(&self, tokens: &[String]) -> Result<(ValueExpr, Vec<String>), Error> {
        let token = &tokens[0];
        let Some(close) = token.find(']') else {
            return Err(Error::SyntaxError(format!(
                "expected a closing ']' in {token}"
            )));
        };
        let selector = match &token[1..close] {
            "some" => Selector::Some,
            "all" => Selector::All,
            index => match index.parse::<usize>() {
                Ok(index) => Selector::Index(index),
                Err(_) => {
                    return Err(Error::SyntaxError(format!(
                        "expected some, all, or an array index in {token}"
                    )))
                }
            },
        };
        let remainder = &token[close + 1..];
        let (inner, rest) = self.parse_nested(remainder, &tokens[1..], token)?;
        Ok((
            Expr::Atom(ValuePredicate::array_element(selector, inner)),
            rest,
        ))
    }

    /// Parses the predicate following a key or selector. `remainder`
    /// is the unconsumed tail of the current token (`.key2[0]` of
    /// `.key1.key2[0]`), which is pushed back as a synthetic token.
    fn parse_nested(
        &self,
        remainder: &str,
        rest: &[String],
        context: &str,
    ) -> Result<(ValueExpr, Vec<String>), Error> {
        let mut tokens: Vec<String> = Vec::with_capacity(rest.len() + 1);
        if !remainder.is_empty() {
            tokens.push(remainder.to_string());
        }
        tokens.extend(rest.iter().cloned());
        if tokens.is_empty() {
            return Err(Error::SyntaxError(format!(
                "expected a predicate after {context}"
            )));
        }
        if tokens[0] == "(" {
            let parser = Parser::new(self);
            let partial = parser.parse_parenthesized_only(&tokens)?;
            let predicate = partial
                .predicate
                .expect("a parenthesized parse always yields a predicate");
            return Ok((predicate, partial.rest));
        }
        match self.parse_predicate(&tokens) {
            Ok(parsed) => Ok(parsed),
            Err(err) if err.is_match_error() => Err(Error::SyntaxError(format!(
                "expected a predicate after {context}"
            ))),
            Err(err) => Err(err),
        }
    }

    fn parse_primitive_predicate(
        &self,
        tokens: &[String],
    ) -> Result<(ValueExpr, Vec<String>), Error> {
        let token = &tokens[0];
        let rest = tokens[1..].to_vec();

        if token == "-empty" {
            return Ok((
                Expr::Atom(ValuePredicate::Empty { negated: false }),
                rest,
            ));
        }
        if let Some(atom) = self.parse_duration(token)? {
            return Ok((Expr::Atom(ValuePredicate::Time(atom)), rest));
        }
        if let Some(atom) = parse_numeric(token)? {
            return Ok((Expr::Atom(ValuePredicate::Numeric(atom)), rest));
        }
        if !token.starts_with('-') && !token.is_empty() {
            return Ok((
                Expr::Atom(ValuePredicate::String(StringAtom::eq(token.clone()))),
                rest,
            ));
        }
        Err(Error::MatchError(format!(
            "expected either a primitive, object, or array predicate, got {token}"
        )))
    }

    /// `(+|-)? Duration | (+|-)? '{' Duration '}'`
    fn parse_duration(&self, token: &str) -> Result<Option<TimeAtom>, Error> {
        let (op, body) = split_sign(token);
        let (body, from_reference) = match body.strip_prefix('{') {
            Some(inner) => match inner.strip_suffix('}') {
                Some(inner) => (inner, false),
                None => {
                    return Err(Error::SyntaxError(format!(
                        "expected a closing '}}' in {token}"
                    )))
                }
            },
            None => (body, true),
        };
        let Ok(duration) = humantime::parse_duration(body) else {
            return Ok(None);
        };
        Ok(Some(TimeAtom::Diff {
            op,
            duration: time::Duration::try_from(duration).map_err(|err| {
                Error::SyntaxError(format!("{token} is out of range: {err}"))
            })?,
            reference: self.reference,
            from_reference,
        }))
    }
}

/// `(+|-)? <decimal>`; '+' queries greater-than, '-' less-than.
fn parse_numeric(token: &str) -> Result<Option<NumericAtom>, Error> {
    let (op, body) = split_sign(token);
    if body.is_empty() {
        return Ok(None);
    }
    match BigDecimal::from_str(body) {
        Ok(value) => Ok(Some(NumericAtom::new(op, value))),
        Err(_) => Ok(None),
    }
}

fn split_sign(token: &str) -> (ComparisonOp, &str) {
    match token.as_bytes().first() {
        Some(b'+') => (ComparisonOp::Gt, &token[1..]),
        Some(b'-') => (ComparisonOp::Lt, &token[1..]),
        _ => (ComparisonOp::Eql, token),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rql::ValueExprExt;
    use time::macros::datetime;

    fn grammar() -> MetaGrammar {
        MetaGrammar {
            reference: datetime!(2020-01-02 00:00:00 UTC),
        }
    }

    fn tokens(raw: &str) -> Vec<String> {
        raw.split_whitespace().map(String::from).collect()
    }

    fn parse(raw: &str) -> ValueExpr {
        let grammar = grammar();
        let parser = Parser::new(&grammar);
        let partial = parser.parse(&tokens(raw)).unwrap();
        assert!(partial.error.is_none(), "leftover error: {:?}", partial.error);
        assert!(partial.rest.is_empty(), "leftover tokens: {:?}", partial.rest);
        partial.predicate.unwrap()
    }

    #[test]
    fn parses_key_sequences() {
        let expr = parse(".cpuOptions.coreCount 4");
        assert!(expr.eval(&serde_json::json!({"cpuOptions": {"coreCount": 4}})));
        assert!(!expr.eval(&serde_json::json!({"cpuOptions": {"coreCount": 8}})));

        // Keys match case-insensitively.
        assert!(expr.eval(&serde_json::json!({"CPUOptions": {"CoreCount": 4}})));
    }

    #[test]
    fn parses_array_selectors() {
        let expr = parse(".tags[some].key termination_date");
        let metadata = serde_json::json!({
            "tags": [{"key": "foo"}, {"key": "termination_date"}],
        });
        assert!(expr.eval(&metadata));
        assert!(!parse(".tags[all].key termination_date").eval(&metadata));
        assert!(parse(".tags[1].key termination_date").eval(&metadata));
        assert!(!parse(".tags[0].key termination_date").eval(&metadata));
    }

    #[test]
    fn parses_primitive_forms() {
        assert!(parse(".a x86_64").eval(&serde_json::json!({"a": "x86_64"})));
        assert!(parse(".a +4").eval(&serde_json::json!({"a": 5})));
        assert!(!parse(".a +4").eval(&serde_json::json!({"a": 4})));
        assert!(parse(".a -4").eval(&serde_json::json!({"a": 3})));
        assert!(parse(".a -empty").eval(&serde_json::json!({"a": {}})));
        assert!(!parse(".a -empty").eval(&serde_json::json!({"a": "s"})));
    }

    #[test]
    fn parses_duration_forms() {
        // Reference is 2020-01-02T00:00:00Z.
        let metadata = |when: &str| serde_json::json!({ "expiry": when });

        // More than one hour before the reference.
        let old = parse(".expiry +1h");
        assert!(old.eval(&metadata("2020-01-01T00:00:00Z")));
        assert!(!old.eval(&metadata("2020-01-01T23:30:00Z")));
        // Future values are a time mismatch.
        assert!(!old.eval(&metadata("2020-01-03T00:00:00Z")));

        // Within the last hour.
        let recent = parse(".expiry -1h");
        assert!(recent.eval(&metadata("2020-01-01T23:30:00Z")));
        assert!(!recent.eval(&metadata("2020-01-01T00:00:00Z")));

        // More than one hour after the reference.
        let upcoming = parse(".expiry +{1h}");
        assert!(upcoming.eval(&metadata("2020-01-02T02:00:00Z")));
        assert!(!upcoming.eval(&metadata("2020-01-01T00:00:00Z")));
    }

    #[test]
    fn parses_nested_expressions() {
        let expr = parse(".tags[some] ( .key foo -o .key bar )");
        assert!(expr.eval(&serde_json::json!({"tags": [{"key": "bar"}]})));
        assert!(!expr.eval(&serde_json::json!({"tags": [{"key": "baz"}]})));
    }

    #[test]
    fn expression_operators_compose() {
        let expr = parse(".a 1 -o .b 2");
        assert!(expr.eval(&serde_json::json!({"a": 1})));
        assert!(expr.eval(&serde_json::json!({"b": 2})));
        assert!(!expr.eval(&serde_json::json!({"b": 3})));

        let expr = parse("! .a 1");
        assert!(expr.eval(&serde_json::json!({"a": 2})));
        assert!(!expr.eval(&serde_json::json!({"a": 1})));
        // Missing keys are out of domain, so negation stays false.
        assert!(!expr.eval(&serde_json::json!({"b": 1})));
    }

    #[test]
    fn negating_empty_flips_in_place() {
        let expr = parse("! .a -empty");
        assert!(expr.eval(&serde_json::json!({"a": {"k": 1}})));
        assert!(!expr.eval(&serde_json::json!({"a": {}})));
        // Still only matches collections.
        assert!(!expr.eval(&serde_json::json!({"a": 5})));
    }

    #[test]
    fn missing_predicates_are_syntax_errors() {
        let grammar = grammar();
        let parser = Parser::new(&grammar);
        let err = parser.parse(&tokens(".key")).unwrap_err();
        assert!(matches!(err, Error::SyntaxError(_)), "got {err:?}");

        let err = parser.parse(&tokens(".key [oops] 5")).unwrap_err();
        assert!(matches!(err, Error::SyntaxError(_)), "got {err:?}");
    }

    #[test]
    fn stops_at_tokens_it_cannot_claim() {
        let grammar = grammar();
        let parser = Parser::new(&grammar);
        let partial = parser.parse(&tokens(".a 1 -name foo")).unwrap();
        assert!(partial.predicate.is_some());
        assert_eq!(partial.rest, tokens("-name foo"));
        assert!(matches!(partial.error, Some(Error::UnknownToken(_))));
    }
}
