use crate::expr::{Atom, Expr};
use crate::numeric::{decimal_of, NumericAtom, UnsignedNumericAtom};
use crate::string::StringAtom;
use crate::time_predicate::TimeAtom;
use bigdecimal::BigDecimal;
use plugin::Error;
use serde_json::Value;

/// An expression over value-predicate atoms.
pub type ValueExpr = Expr<ValuePredicate>;

/// An expression over unsigned numeric atoms, used by size predicates.
pub type SizeExpr = Expr<UnsignedNumericAtom>;

/// A predicate over a JSON-shaped value. Leaves are type-preserving:
/// a string predicate is false on non-string input, and stays false
/// under negation.
#[derive(Debug, Clone, PartialEq)]
pub enum ValuePredicate {
    /// Matches only the absence-of-value token (JSON null).
    Null,
    Boolean(bool),
    Numeric(NumericAtom),
    Time(TimeAtom),
    String(StringAtom),
    Object(CollectionPredicate),
    Array(CollectionPredicate),
    /// The find surface's `-empty`: an empty object or array. The
    /// negated form still only matches collections.
    Empty { negated: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CollectionPredicate {
    Element {
        selector: Selector,
        predicate: Box<ValueExpr>,
    },
    Size(SizeExpr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// Object element by key. Matching is case-insensitive: the first
    /// key whose uppercased form equals the uppercased requested key.
    Key(String),
    /// ∃ array element.
    Some,
    /// ∀ array elements.
    All,
    /// A positional array element.
    Index(usize),
}

impl ValuePredicate {
    pub fn object_element(key: impl Into<String>, predicate: ValueExpr) -> Self {
        ValuePredicate::Object(CollectionPredicate::Element {
            selector: Selector::Key(key.into()),
            predicate: Box::new(predicate),
        })
    }

    pub fn array_element(selector: Selector, predicate: ValueExpr) -> Self {
        ValuePredicate::Array(CollectionPredicate::Element {
            selector,
            predicate: Box::new(predicate),
        })
    }

    /// Type check: is `value` the kind of value this predicate can
    /// meaningfully evaluate? `eval` implies `in_domain` except for the
    /// vacuous `all` quantifier on an empty array.
    pub fn in_domain(&self, value: &Value) -> bool {
        match self {
            ValuePredicate::Null => value.is_null(),
            ValuePredicate::Boolean(_) => value.is_boolean(),
            ValuePredicate::Numeric(_) => value.is_number(),
            ValuePredicate::Time(atom) => atom.in_domain(value),
            ValuePredicate::String(_) => value.is_string(),
            ValuePredicate::Object(collection) => match value {
                Value::Object(object) => match collection {
                    CollectionPredicate::Element {
                        selector: Selector::Key(key),
                        predicate,
                    } => match find_matching_key(object, key) {
                        Some(matched) => predicate.in_domain(&object[matched]),
                        None => false,
                    },
                    CollectionPredicate::Element { .. } => false,
                    CollectionPredicate::Size(_) => true,
                },
                _ => false,
            },
            ValuePredicate::Array(collection) => match value {
                Value::Array(items) => match collection {
                    CollectionPredicate::Element {
                        selector: Selector::Index(index),
                        predicate,
                    } => items.get(*index).is_some_and(|item| predicate.in_domain(item)),
                    CollectionPredicate::Element {
                        selector: Selector::Some | Selector::All,
                        predicate,
                    } => {
                        // The element count is unknown in general, so
                        // requiring one in-domain element is the right
                        // level of strictness for some/all.
                        items.iter().any(|item| predicate.in_domain(item))
                    }
                    CollectionPredicate::Element { .. } => false,
                    CollectionPredicate::Size(_) => true,
                },
                _ => false,
            },
            ValuePredicate::Empty { .. } => value.is_object() || value.is_array(),
        }
    }

    pub fn eval(&self, value: &Value) -> bool {
        match self {
            ValuePredicate::Null => value.is_null(),
            ValuePredicate::Boolean(literal) => value.as_bool() == Some(*literal),
            ValuePredicate::Numeric(atom) => match value {
                Value::Number(n) => decimal_of(n).is_some_and(|decimal| atom.eval(&decimal)),
                _ => false,
            },
            ValuePredicate::Time(atom) => atom.eval(value),
            ValuePredicate::String(atom) => match value.as_str() {
                Some(s) => atom.eval(s),
                None => false,
            },
            ValuePredicate::Object(collection) => match value {
                Value::Object(object) => match collection {
                    CollectionPredicate::Element {
                        selector: Selector::Key(key),
                        predicate,
                    } => match find_matching_key(object, key) {
                        Some(matched) => predicate.eval(&object[matched]),
                        None => false,
                    },
                    CollectionPredicate::Element { .. } => false,
                    CollectionPredicate::Size(size) => {
                        eval_size(size, BigDecimal::from(object.len() as u64))
                    }
                },
                _ => false,
            },
            ValuePredicate::Array(collection) => match value {
                Value::Array(items) => match collection {
                    CollectionPredicate::Element {
                        selector: Selector::Some,
                        predicate,
                    } => items.iter().any(|item| predicate.eval(item)),
                    CollectionPredicate::Element {
                        selector: Selector::All,
                        predicate,
                    } => items.iter().all(|item| predicate.eval(item)),
                    CollectionPredicate::Element {
                        selector: Selector::Index(index),
                        predicate,
                    } => items.get(*index).is_some_and(|item| predicate.eval(item)),
                    CollectionPredicate::Element {
                        selector: Selector::Key(_),
                        ..
                    } => false,
                    CollectionPredicate::Size(size) => {
                        eval_size(size, BigDecimal::from(items.len() as u64))
                    }
                },
                _ => false,
            },
            ValuePredicate::Empty { negated } => {
                let len = match value {
                    Value::Object(object) => object.len(),
                    Value::Array(items) => items.len(),
                    _ => return false,
                };
                (len == 0) != *negated
            }
        }
    }

    /// Atom-level negation for the find surface. Returns None when the
    /// generic domain-preserving `NOT` is the right semantics.
    pub fn negated(&self) -> Option<ValuePredicate> {
        match self {
            ValuePredicate::Empty { negated } => Some(ValuePredicate::Empty { negated: !negated }),
            ValuePredicate::Time(atom) => atom.negated_diff().map(ValuePredicate::Time),
            _ => None,
        }
    }
}

/// Evaluation of a value-predicate expression. `NOT p` holds only on
/// values inside p's domain: negating a string predicate is still
/// false on a number.
pub trait ValueExprExt {
    fn in_domain(&self, value: &Value) -> bool;
    fn eval(&self, value: &Value) -> bool;
}

impl ValueExprExt for ValueExpr {
    fn in_domain(&self, value: &Value) -> bool {
        match self {
            Expr::Atom(atom) => atom.in_domain(value),
            Expr::And(operands) => operands.iter().all(|o| o.in_domain(value)),
            Expr::Or(operands) => operands.iter().any(|o| o.in_domain(value)),
            Expr::Not(inner) => inner.in_domain(value),
        }
    }

    fn eval(&self, value: &Value) -> bool {
        match self {
            Expr::Atom(atom) => atom.eval(value),
            Expr::And(operands) => operands.iter().all(|o| o.eval(value)),
            Expr::Or(operands) => operands.iter().any(|o| o.eval(value)),
            Expr::Not(inner) => inner.in_domain(value) && !inner.eval(value),
        }
    }
}

pub fn eval_size(size: &SizeExpr, length: BigDecimal) -> bool {
    match size {
        Expr::Atom(atom) => atom.eval(&length),
        Expr::And(operands) => operands.iter().all(|o| eval_size(o, length.clone())),
        Expr::Or(operands) => operands.iter().any(|o| eval_size(o, length.clone())),
        Expr::Not(inner) => !eval_size(inner, length),
    }
}

fn find_matching_key<'o>(
    object: &'o serde_json::Map<String, Value>,
    key: &str,
) -> Option<&'o String> {
    let upcased = key.to_uppercase();
    object.keys().find(|k| k.to_uppercase() == upcased)
}

impl Atom for ValuePredicate {
    fn marshal(&self) -> Value {
        match self {
            ValuePredicate::Null => Value::Null,
            ValuePredicate::Boolean(literal) => Value::Bool(*literal),
            ValuePredicate::Numeric(atom) => tagged("number", atom.marshal()),
            ValuePredicate::Time(atom) => tagged("time", atom.marshal()),
            ValuePredicate::String(atom) => tagged("string", atom.marshal()),
            ValuePredicate::Object(collection) => tagged("object", collection.marshal()),
            ValuePredicate::Array(collection) => tagged("array", collection.marshal()),
            // Internal to the find surface; no RQL wire form.
            ValuePredicate::Empty { negated } => tagged("empty", Value::Bool(*negated)),
        }
    }

    fn unmarshal(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Null => Ok(ValuePredicate::Null),
            Value::Bool(literal) => Ok(ValuePredicate::Boolean(*literal)),
            Value::Array(items) => {
                let Some(tag) = items.first().and_then(Value::as_str) else {
                    return Err(Error::MatchError(
                        "expected a value predicate".to_string(),
                    ));
                };
                match tag {
                    "object" | "array" => {
                        let payload = single_payload(tag, items)?;
                        CollectionPredicate::unmarshal(tag, payload).map(|collection| {
                            if tag == "object" {
                                ValuePredicate::Object(collection)
                            } else {
                                ValuePredicate::Array(collection)
                            }
                        })
                    }
                    "string" => {
                        let payload = single_payload(tag, items)?;
                        StringAtom::unmarshal(payload)
                            .map(ValuePredicate::String)
                            .map_err(|err| syntaxify(tag, err))
                    }
                    "number" => {
                        let payload = single_payload(tag, items)?;
                        NumericAtom::unmarshal(payload)
                            .map(ValuePredicate::Numeric)
                            .map_err(|err| syntaxify(tag, err))
                    }
                    "time" => {
                        let payload = single_payload(tag, items)?;
                        TimeAtom::unmarshal(payload)
                            .map(ValuePredicate::Time)
                            .map_err(|err| syntaxify(tag, err))
                    }
                    _ => Err(Error::MatchError("expected a value predicate".to_string())),
                }
            }
            _ => Err(Error::MatchError("expected a value predicate".to_string())),
        }
    }
}

fn tagged(tag: &str, payload: Value) -> Value {
    Value::Array(vec![Value::from(tag), payload])
}

fn single_payload<'v>(tag: &str, items: &'v [Value]) -> Result<&'v Value, Error> {
    match items.len() {
        2 => Ok(&items[1]),
        1 => Err(Error::SyntaxError(format!(
            "{tag} must be formatted as [\"{tag}\", <predicate>] (missing the predicate part)"
        ))),
        _ => Err(Error::SyntaxError(format!(
            "{tag} must be formatted as [\"{tag}\", <predicate>]"
        ))),
    }
}

// Once the collection tag matched, inner mismatches are malformed
// input, not an invitation to try other variants.
fn syntaxify(tag: &str, err: Error) -> Error {
    match err {
        Error::MatchError(message) => {
            Error::SyntaxError(format!("error unmarshalling the {tag} predicate: {message}"))
        }
        other => other,
    }
}

impl CollectionPredicate {
    fn marshal(&self) -> Value {
        match self {
            CollectionPredicate::Element {
                selector,
                predicate,
            } => {
                let selector = match selector {
                    Selector::Key(key) => serde_json::json!(["key", key]),
                    Selector::Some => Value::from("some"),
                    Selector::All => Value::from("all"),
                    Selector::Index(index) => Value::from(*index),
                };
                Value::Array(vec![selector, predicate.marshal()])
            }
            CollectionPredicate::Size(size) => tagged("size", size.marshal()),
        }
    }

    fn unmarshal(ctype: &str, payload: &Value) -> Result<Self, Error> {
        let format_err = format!(
            "must be formatted as [\"{ctype}\", <size_predicate> | <{ctype}_element_predicate>]"
        );
        let Value::Array(items) = payload else {
            return Err(Error::SyntaxError(format_err));
        };
        let Some(first) = items.first() else {
            return Err(Error::SyntaxError(format_err));
        };

        if first.as_str() == Some("size") {
            let predicate = single_payload("size", items)?;
            let size = SizeExpr::unmarshal(predicate).map_err(|err| syntaxify("size", err))?;
            return Ok(CollectionPredicate::Size(size));
        }

        let selector = match ctype {
            "object" => {
                let Value::Array(key_selector) = first else {
                    return Err(Error::SyntaxError(format!(
                        "element predicate: {format_err}"
                    )));
                };
                if key_selector.first().and_then(Value::as_str) != Some("key") {
                    return Err(Error::SyntaxError(format!(
                        "element predicate: {format_err}"
                    )));
                }
                match key_selector.len() {
                    2 => match key_selector[1].as_str() {
                        Some(key) => Selector::Key(key.to_string()),
                        None => {
                            return Err(Error::SyntaxError(format!(
                                "element predicate: key must be a string, not {}",
                                key_selector[1]
                            )))
                        }
                    },
                    1 => {
                        return Err(Error::SyntaxError(
                            "element predicate: missing the key".to_string(),
                        ))
                    }
                    _ => {
                        return Err(Error::SyntaxError(format!(
                            "element predicate: {format_err}"
                        )))
                    }
                }
            }
            _ => match first {
                Value::String(s) if s == "some" => Selector::Some,
                Value::String(s) if s == "all" => Selector::All,
                Value::Number(n) => match n.as_u64() {
                    Some(index) => Selector::Index(index as usize),
                    None => {
                        return Err(Error::SyntaxError(
                            "element predicate: array index must be an unsigned integer"
                                .to_string(),
                        ))
                    }
                },
                _ => {
                    return Err(Error::SyntaxError(format!(
                        "element predicate: {format_err}"
                    )))
                }
            },
        };

        match items.len() {
            2 => {
                let inner = ValueExpr::unmarshal(&items[1]).map_err(|err| {
                    Error::SyntaxError(format!(
                        "element predicate: error unmarshalling the value predicate: {err}"
                    ))
                })?;
                Ok(CollectionPredicate::Element {
                    selector,
                    predicate: Box::new(inner),
                })
            }
            1 => Err(Error::SyntaxError(format!(
                "element predicate: {format_err} (missing the value predicate)"
            ))),
            _ => Err(Error::SyntaxError(format!(
                "element predicate: {format_err}"
            ))),
        }
    }
}
