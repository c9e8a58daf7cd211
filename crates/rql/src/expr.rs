use plugin::Error;
use serde_json::Value;

/// An atom of the query language: it knows its JSON wire form. The
/// unmarshal side distinguishes "this isn't my shape" (MatchError —
/// the caller should try another variant) from "this is my shape but
/// malformed" (SyntaxError — stop and report).
pub trait Atom: Sized {
    fn marshal(&self) -> Value;
    fn unmarshal(value: &Value) -> Result<Self, Error>;
}

/// A predicate expression: atoms closed under AND, OR and NOT.
/// Combinators are n-ary on the wire (`["AND", p, q, ...]`), so they
/// are n-ary here too, keeping `unmarshal ∘ marshal = id`.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr<P> {
    Atom(P),
    And(Vec<Expr<P>>),
    Or(Vec<Expr<P>>),
    Not(Box<Expr<P>>),
}

impl<P> Expr<P> {
    pub fn and(operands: Vec<Expr<P>>) -> Self {
        Expr::And(operands)
    }

    pub fn or(operands: Vec<Expr<P>>) -> Self {
        Expr::Or(operands)
    }

    pub fn not(operand: Expr<P>) -> Self {
        Expr::Not(Box::new(operand))
    }

    /// Combines two expressions under a binary operator, flattening
    /// nothing: `p AND q` stays `["AND", p, q]`.
    pub fn combine_and(self, other: Expr<P>) -> Self {
        Expr::And(vec![self, other])
    }

    pub fn combine_or(self, other: Expr<P>) -> Self {
        Expr::Or(vec![self, other])
    }

    pub fn atoms(&self) -> Vec<&P> {
        match self {
            Expr::Atom(atom) => vec![atom],
            Expr::And(operands) | Expr::Or(operands) => {
                operands.iter().flat_map(|o| o.atoms()).collect()
            }
            Expr::Not(inner) => inner.atoms(),
        }
    }
}

impl<P: Atom> Expr<P> {
    pub fn marshal(&self) -> Value {
        match self {
            Expr::Atom(atom) => atom.marshal(),
            Expr::And(operands) => combinator("AND", operands),
            Expr::Or(operands) => combinator("OR", operands),
            Expr::Not(inner) => Value::Array(vec![Value::from("NOT"), inner.marshal()]),
        }
    }

    pub fn unmarshal(value: &Value) -> Result<Self, Error> {
        if let Value::Array(items) = value {
            match items.first().and_then(Value::as_str) {
                Some(op @ ("AND" | "OR")) => {
                    if items.len() < 3 {
                        return Err(Error::SyntaxError(format!(
                            "{op} must be formatted as [\"{op}\", <predicate>, <predicate>, ...]"
                        )));
                    }
                    let operands = items[1..]
                        .iter()
                        .map(|item| {
                            Expr::unmarshal(item).map_err(|err| {
                                Error::SyntaxError(format!(
                                    "error unmarshalling a {op} operand: {err}"
                                ))
                            })
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    return Ok(if op == "AND" {
                        Expr::And(operands)
                    } else {
                        Expr::Or(operands)
                    });
                }
                Some("NOT") => {
                    if items.len() != 2 {
                        return Err(Error::SyntaxError(
                            "NOT must be formatted as [\"NOT\", <predicate>]".to_string(),
                        ));
                    }
                    let inner = Expr::unmarshal(&items[1]).map_err(|err| {
                        Error::SyntaxError(format!("error unmarshalling the NOT operand: {err}"))
                    })?;
                    return Ok(Expr::not(inner));
                }
                _ => {}
            }
        }
        P::unmarshal(value).map(Expr::Atom)
    }
}

fn combinator<P: Atom>(op: &str, operands: &[Expr<P>]) -> Value {
    let mut items = Vec::with_capacity(operands.len() + 1);
    items.push(Value::from(op));
    items.extend(operands.iter().map(Expr::marshal));
    Value::Array(items)
}
