use crate::expr::Atom;
use bigdecimal::BigDecimal;
use plugin::Error;
use serde_json::Value;
use std::str::FromStr;

/// The comparison operators shared by numeric and time predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Eql,
    Neql,
}

impl ComparisonOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ComparisonOp::Lt => "<",
            ComparisonOp::Lte => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Gte => ">=",
            ComparisonOp::Eql => "=",
            ComparisonOp::Neql => "!=",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<ComparisonOp> {
        match symbol {
            "<" => Some(ComparisonOp::Lt),
            "<=" => Some(ComparisonOp::Lte),
            ">" => Some(ComparisonOp::Gt),
            ">=" => Some(ComparisonOp::Gte),
            "=" => Some(ComparisonOp::Eql),
            "!=" => Some(ComparisonOp::Neql),
            _ => None,
        }
    }

    pub fn compare<T: PartialOrd>(&self, left: &T, right: &T) -> bool {
        match self {
            ComparisonOp::Lt => left < right,
            ComparisonOp::Lte => left <= right,
            ComparisonOp::Gt => left > right,
            ComparisonOp::Gte => left >= right,
            ComparisonOp::Eql => left == right,
            ComparisonOp::Neql => left != right,
        }
    }
}

/// A comparison against an exact decimal: `["<op>", "<digits>"]`.
/// Decimal arithmetic keeps comparisons exact at arbitrary precision.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericAtom {
    pub op: ComparisonOp,
    pub value: BigDecimal,
}

impl NumericAtom {
    pub fn new(op: ComparisonOp, value: BigDecimal) -> Self {
        Self { op, value }
    }

    pub fn eval(&self, value: &BigDecimal) -> bool {
        self.op.compare(value, &self.value)
    }

    fn unmarshal_parts(value: &Value) -> Result<(ComparisonOp, BigDecimal), Error> {
        let Value::Array(items) = value else {
            return Err(Error::MatchError(
                "must be formatted as [<comparison_op>, <number>]".to_string(),
            ));
        };
        let Some(op) = items.first().and_then(Value::as_str).and_then(ComparisonOp::from_symbol)
        else {
            return Err(Error::MatchError(
                "must be formatted as [<comparison_op>, <number>]".to_string(),
            ));
        };
        if items.len() != 2 {
            return Err(Error::SyntaxError(format!(
                "{} must be formatted as [\"{}\", <number>]",
                op.symbol(),
                op.symbol()
            )));
        }
        let number = match &items[1] {
            Value::String(s) => BigDecimal::from_str(s).map_err(|err| {
                Error::SyntaxError(format!("could not parse {s} as a number: {err}"))
            })?,
            Value::Number(n) => BigDecimal::from_str(&n.to_string())
                .map_err(|err| Error::SyntaxError(format!("could not parse {n}: {err}")))?,
            other => {
                return Err(Error::SyntaxError(format!(
                    "expected a number, got {other}"
                )))
            }
        };
        Ok((op, number))
    }
}

impl Atom for NumericAtom {
    fn marshal(&self) -> Value {
        Value::Array(vec![
            Value::from(self.op.symbol()),
            Value::from(self.value.normalized().to_string()),
        ])
    }

    fn unmarshal(value: &Value) -> Result<Self, Error> {
        let (op, value) = Self::unmarshal_parts(value)?;
        Ok(Self { op, value })
    }
}

/// A numeric atom restricted to unsigned values; used by size
/// predicates, where negative sizes are meaningless.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsignedNumericAtom(pub NumericAtom);

impl UnsignedNumericAtom {
    pub fn eval(&self, value: &BigDecimal) -> bool {
        self.0.eval(value)
    }
}

impl Atom for UnsignedNumericAtom {
    fn marshal(&self) -> Value {
        self.0.marshal()
    }

    fn unmarshal(value: &Value) -> Result<Self, Error> {
        let (op, number) = NumericAtom::unmarshal_parts(value)?;
        if number < BigDecimal::from(0) {
            return Err(Error::SyntaxError(format!(
                "expected an unsigned number, got {number}"
            )));
        }
        Ok(Self(NumericAtom::new(op, number)))
    }
}

/// Converts a JSON number to an exact decimal. serde_json's
/// float_roundtrip feature preserves the textual form, so going
/// through the string keeps the value exact.
pub fn decimal_of(n: &serde_json::Number) -> Option<BigDecimal> {
    BigDecimal::from_str(&n.to_string()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(raw: serde_json::Value) -> NumericAtom {
        NumericAtom::unmarshal(&raw).unwrap()
    }

    #[test]
    fn compares_exactly() {
        let gt = atom(serde_json::json!([">", "2"]));
        assert!(gt.eval(&BigDecimal::from(3)));
        assert!(!gt.eval(&BigDecimal::from(2)));

        // Values beyond f64 precision still compare exactly.
        let eq = atom(serde_json::json!(["=", "36893488147419103233"]));
        assert!(eq.eval(&BigDecimal::from_str("36893488147419103233").unwrap()));
        assert!(!eq.eval(&BigDecimal::from_str("36893488147419103232").unwrap()));
    }

    #[test]
    fn round_trips() {
        for raw in [
            serde_json::json!(["<", "1"]),
            serde_json::json!([">=", "2.5"]),
            serde_json::json!(["!=", "-3"]),
        ] {
            let parsed = atom(raw.clone());
            assert_eq!(parsed.marshal(), raw);
            assert_eq!(NumericAtom::unmarshal(&parsed.marshal()).unwrap(), parsed);
        }
    }

    #[test]
    fn accepts_json_numbers() {
        let parsed = atom(serde_json::json!(["=", 4]));
        assert!(parsed.eval(&BigDecimal::from(4)));
    }

    #[test]
    fn unknown_ops_are_match_errors() {
        let err = NumericAtom::unmarshal(&serde_json::json!(["~", "1"])).unwrap_err();
        assert!(err.is_match_error(), "got {err:?}");
    }

    #[test]
    fn malformed_numbers_are_syntax_errors() {
        let err = NumericAtom::unmarshal(&serde_json::json!(["<", "one"])).unwrap_err();
        assert!(matches!(err, Error::SyntaxError(_)), "got {err:?}");
    }

    #[test]
    fn unsigned_atoms_reject_negatives() {
        let err = UnsignedNumericAtom::unmarshal(&serde_json::json!(["<", "-1"])).unwrap_err();
        assert!(matches!(err, Error::SyntaxError(_)), "got {err:?}");
        assert!(UnsignedNumericAtom::unmarshal(&serde_json::json!(["<", "1"])).is_ok());
    }
}
