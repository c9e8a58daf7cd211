//! The top-level `find` primaries: `-name`, `-size`, `-kind`,
//! `-action`, `-meta`/`-m`, `-true`, `-false`. Each compiles onto the
//! shared entry-predicate atoms.

use crate::expression::{Grammar, Parser, Partial};
use crate::meta::MetaGrammar;
use bigdecimal::BigDecimal;
use plugin::{Action, Error};
use rql::{ComparisonOp, Expr, NumericAtom, Primary, StringAtom, UnsignedNumericAtom};
use time::OffsetDateTime;

pub struct FindGrammar {
    pub reference: OffsetDateTime,
}

impl Grammar for FindGrammar {
    type Primary = Primary;

    fn parse_primary(&self, tokens: &[String]) -> Result<Partial<Primary>, Error> {
        let token = tokens[0].as_str();
        let rest = &tokens[1..];
        match token {
            "-true" => Ok(Partial::complete(Expr::Atom(Primary::Boolean(true)), rest)),
            "-false" => Ok(Partial::complete(Expr::Atom(Primary::Boolean(false)), rest)),
            "-name" => {
                let pattern = required_arg(token, rest)?;
                let atom = StringAtom::glob(pattern)
                    .map_err(|err| Error::SyntaxError(format!("{token}: {err}")))?;
                Ok(Partial::complete(
                    Expr::Atom(Primary::Name(Expr::Atom(atom))),
                    &rest[1..],
                ))
            }
            "-kind" => {
                let pattern = required_arg(token, rest)?;
                let primary = Primary::kind(pattern)
                    .map_err(|err| Error::SyntaxError(format!("{token}: {err}")))?;
                Ok(Partial::complete(Expr::Atom(primary), &rest[1..]))
            }
            "-action" => {
                let name = required_arg(token, rest)?;
                let Some(action) = Action::from_name(name) else {
                    return Err(Error::SyntaxError(format!(
                        "{name} is an invalid action; valid actions are {}",
                        Action::ALL.map(|a| a.name()).join(", ")
                    )));
                };
                Ok(Partial::complete(
                    Expr::Atom(Primary::Action(action)),
                    &rest[1..],
                ))
            }
            "-size" => {
                let size = required_arg(token, rest)?;
                let primary = parse_size(size)?;
                Ok(Partial::complete(Expr::Atom(primary), &rest[1..]))
            }
            "-meta" | "-m" => self.parse_meta(token, rest),
            _ => Err(Error::MatchError(format!("unknown primary {token}"))),
        }
    }
}

impl FindGrammar {
    fn parse_meta(&self, token: &str, rest: &[String]) -> Result<Partial<Primary>, Error> {
        let grammar = MetaGrammar {
            reference: self.reference,
        };
        let parser = Parser::new(&grammar);
        let partial = parser.parse(rest)?;
        let Some(predicate) = partial.predicate else {
            return match partial.error {
                Some(Error::EmptyExpression(_)) => Err(Error::SyntaxError(format!(
                    "{token}: expected a predicate expression"
                ))),
                Some(Error::UnknownToken(unknown)) => Err(Error::SyntaxError(format!(
                    "{token}: unknown predicate {unknown}"
                ))),
                Some(error) => Err(error),
                None => unreachable!("a partial has a predicate or an error"),
            };
        };
        // Leftover tokens (an unknown meta token, a dangling '!') are
        // handed back for the enclosing expression to claim.
        Ok(Partial {
            predicate: Some(Expr::Atom(Primary::Meta(predicate))),
            rest: partial.rest,
            error: partial.error,
        })
    }
}

fn required_arg<'t>(primary: &str, rest: &'t [String]) -> Result<&'t str, Error> {
    rest.first().map(String::as_str).ok_or_else(|| {
        Error::SyntaxError(format!("{primary}: requires additional arguments"))
    })
}

/// `(+|-)? <digits> (c|k|M|G|T|P)?`. Unsuffixed sizes count 512-byte
/// blocks, rounded up; suffixed sizes compare the raw byte count.
fn parse_size(token: &str) -> Result<Primary, Error> {
    let syntax = || {
        Error::SyntaxError(format!(
            "-size: {token} is not a valid size; expected (+|-)?<digits>(c|k|M|G|T|P)?"
        ))
    };
    let (op, body) = match token.as_bytes().first() {
        Some(b'+') => (ComparisonOp::Gt, &token[1..]),
        Some(b'-') => (ComparisonOp::Lt, &token[1..]),
        _ => (ComparisonOp::Eql, token),
    };
    let (digits, scale) = match body.as_bytes().last() {
        Some(b'c') => (&body[..body.len() - 1], Some(1u64)),
        Some(b'k') => (&body[..body.len() - 1], Some(1 << 10)),
        Some(b'M') => (&body[..body.len() - 1], Some(1 << 20)),
        Some(b'G') => (&body[..body.len() - 1], Some(1 << 30)),
        Some(b'T') => (&body[..body.len() - 1], Some(1u64 << 40)),
        Some(b'P') => (&body[..body.len() - 1], Some(1u64 << 50)),
        _ => (body, None),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(syntax());
    }
    let n: u64 = digits.parse().map_err(|_| syntax())?;
    let (value, blocks) = match scale {
        Some(scale) => (n.checked_mul(scale).ok_or_else(syntax)?, false),
        None => (n, true),
    };
    Ok(Primary::Size {
        predicate: Expr::Atom(UnsignedNumericAtom(NumericAtom::new(
            op,
            BigDecimal::from(value),
        ))),
        blocks,
    })
}
