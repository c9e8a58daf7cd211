use crate::expr::Atom;
use crate::munge;
use crate::numeric::ComparisonOp;
use plugin::Error;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

/// A predicate on instants. The RQL surface compares against a parsed
/// instant; the `find` surface compares the signed difference from a
/// reference time against a duration.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeAtom {
    /// `["<op>", <rfc3339-or-unix-seconds>]`
    Compare {
        op: ComparisonOp,
        instant: OffsetDateTime,
    },
    /// `-meta .key +1h` and friends. When `from_reference` is set the
    /// compared difference is `reference - value` (querying the past);
    /// otherwise `value - reference` (querying the future, the `{...}`
    /// form). A difference with the wrong sign is a time mismatch and
    /// always evaluates false.
    Diff {
        op: ComparisonOp,
        duration: Duration,
        reference: OffsetDateTime,
        from_reference: bool,
    },
}

impl TimeAtom {
    pub fn compare(op: ComparisonOp, instant: OffsetDateTime) -> Self {
        TimeAtom::Compare { op, instant }
    }

    pub fn in_domain(&self, value: &Value) -> bool {
        munge::to_time(value).is_ok()
    }

    pub fn eval(&self, value: &Value) -> bool {
        let Ok(instant) = munge::to_time(value) else {
            return false;
        };
        match self {
            TimeAtom::Compare { op, instant: rhs } => op.compare(&instant, rhs),
            TimeAtom::Diff {
                op,
                duration,
                reference,
                from_reference,
            } => {
                let diff = if *from_reference {
                    *reference - instant
                } else {
                    instant - *reference
                };
                if diff < Duration::ZERO {
                    // Time predicates query either the past or the
                    // future, never both.
                    return false;
                }
                op.compare(&diff, duration)
            }
        }
    }

    /// The negation of a Diff atom negates its comparison while keeping
    /// the time-mismatch rule, so `! +1h` still rejects values on the
    /// wrong side of the reference.
    pub fn negated_diff(&self) -> Option<TimeAtom> {
        match self {
            TimeAtom::Diff {
                op,
                duration,
                reference,
                from_reference,
            } => Some(TimeAtom::Diff {
                op: negate_op(*op),
                duration: *duration,
                reference: *reference,
                from_reference: *from_reference,
            }),
            TimeAtom::Compare { .. } => None,
        }
    }
}

fn negate_op(op: ComparisonOp) -> ComparisonOp {
    match op {
        ComparisonOp::Lt => ComparisonOp::Gte,
        ComparisonOp::Lte => ComparisonOp::Gt,
        ComparisonOp::Gt => ComparisonOp::Lte,
        ComparisonOp::Gte => ComparisonOp::Lt,
        ComparisonOp::Eql => ComparisonOp::Neql,
        ComparisonOp::Neql => ComparisonOp::Eql,
    }
}

impl Atom for TimeAtom {
    fn marshal(&self) -> Value {
        match self {
            TimeAtom::Compare { op, instant } => Value::Array(vec![
                Value::from(op.symbol()),
                Value::from(instant.format(&Rfc3339).expect("instants format infallibly")),
            ]),
            // Diff atoms come from the find surface; they have no RQL
            // wire form and only marshal for diagnostics.
            TimeAtom::Diff {
                op,
                duration,
                reference,
                from_reference,
            } => serde_json::json!([
                op.symbol(),
                {
                    "duration_seconds": duration.whole_seconds(),
                    "reference": reference.format(&Rfc3339).expect("instants format infallibly"),
                    "from_reference": from_reference,
                }
            ]),
        }
    }

    fn unmarshal(value: &Value) -> Result<Self, Error> {
        let Value::Array(items) = value else {
            return Err(Error::MatchError(
                "must be formatted as [<comparison_op>, <time>]".to_string(),
            ));
        };
        let Some(op) = items.first().and_then(Value::as_str).and_then(ComparisonOp::from_symbol)
        else {
            return Err(Error::MatchError(
                "must be formatted as [<comparison_op>, <time>]".to_string(),
            ));
        };
        if items.len() != 2 {
            return Err(Error::SyntaxError(format!(
                "{} must be formatted as [\"{}\", <time>]",
                op.symbol(),
                op.symbol()
            )));
        }
        let instant = munge::to_time(&items[1])
            .map_err(|err| Error::SyntaxError(format!("could not parse the time: {err}")))?;
        Ok(TimeAtom::Compare { op, instant })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn compares_instants() {
        let atom = TimeAtom::unmarshal(&serde_json::json!(["<", "2017-08-07T13:55:25Z"])).unwrap();
        assert!(atom.eval(&Value::from("2016-01-01T00:00:00Z")));
        assert!(!atom.eval(&Value::from("2018-01-01T00:00:00Z")));
        // Unix seconds work too.
        assert!(atom.eval(&serde_json::json!(1400000000)));
        // Non-times are out of domain.
        assert!(!atom.eval(&Value::from("running")));
        assert!(!atom.in_domain(&Value::from("running")));
    }

    #[test]
    fn diffs_query_one_direction_only() {
        let reference = datetime!(2020-01-02 00:00:00 UTC);
        // "+1h": more than an hour before the reference.
        let past = TimeAtom::Diff {
            op: ComparisonOp::Gt,
            duration: Duration::hours(1),
            reference,
            from_reference: true,
        };
        assert!(past.eval(&Value::from("2020-01-01T00:00:00Z")));
        assert!(!past.eval(&Value::from("2020-01-01T23:30:00Z")));
        // A future value is a time mismatch.
        assert!(!past.eval(&Value::from("2020-01-03T00:00:00Z")));

        // "+{1h}": more than an hour after the reference.
        let future = TimeAtom::Diff {
            op: ComparisonOp::Gt,
            duration: Duration::hours(1),
            reference,
            from_reference: false,
        };
        assert!(future.eval(&Value::from("2020-01-02T02:00:00Z")));
        assert!(!future.eval(&Value::from("2020-01-01T00:00:00Z")));
    }

    #[test]
    fn negated_diffs_keep_the_mismatch_rule() {
        let reference = datetime!(2020-01-02 00:00:00 UTC);
        let past = TimeAtom::Diff {
            op: ComparisonOp::Gt,
            duration: Duration::hours(1),
            reference,
            from_reference: true,
        };
        let negated = past.negated_diff().unwrap();
        // Within the hour: the negation holds.
        assert!(negated.eval(&Value::from("2020-01-01T23:30:00Z")));
        // Older than an hour: it doesn't.
        assert!(!negated.eval(&Value::from("2020-01-01T00:00:00Z")));
        // Still false for future values.
        assert!(!negated.eval(&Value::from("2020-01-03T00:00:00Z")));
    }

    #[test]
    fn round_trips_the_compare_form() {
        let raw = serde_json::json!(["<", "2017-08-07T13:55:25Z"]);
        let atom = TimeAtom::unmarshal(&raw).unwrap();
        assert_eq!(atom.marshal(), raw);
    }
}
