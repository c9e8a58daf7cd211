use plugin::Error;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Coerces a JSON value to an instant. Accepts RFC 3339 strings and
/// numeric Unix seconds — the two shapes metadata timestamps take in
/// the wild.
pub fn to_time(value: &Value) -> Result<OffsetDateTime, Error> {
    match value {
        Value::String(s) => OffsetDateTime::parse(s, &Rfc3339)
            .map_err(|err| Error::SyntaxError(format!("could not parse {s} as a time: {err}"))),
        Value::Number(n) => {
            if let Some(seconds) = n.as_i64() {
                OffsetDateTime::from_unix_timestamp(seconds)
                    .map_err(|err| Error::SyntaxError(format!("{n} is not a valid time: {err}")))
            } else if let Some(seconds) = n.as_f64() {
                OffsetDateTime::from_unix_timestamp_nanos((seconds * 1e9) as i128)
                    .map_err(|err| Error::SyntaxError(format!("{n} is not a valid time: {err}")))
            } else {
                Err(Error::SyntaxError(format!("{n} is not a valid time")))
            }
        }
        other => Err(Error::MatchError(format!(
            "expected a time value, got {other}"
        ))),
    }
}
