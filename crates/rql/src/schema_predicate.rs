//! Predicates over entry schemas, used by the walker to prune subtrees
//! whose metadata schemas cannot produce a satisfying document.
//!
//! A `meta` predicate reduces to the set of key sequences it queries.
//! Each key sequence is encoded as a JSON document (keys uppercased,
//! innermost value `null` / `{}` / `[]`) and the schema predicate holds
//! iff the document validates against the entry's munged metadata
//! schema. A structural existence check stands in for "there exists
//! metadata satisfying p".

use crate::expr::Expr;
use crate::value::{CollectionPredicate, Selector, ValueExpr, ValuePredicate};
use globset::GlobMatcher;
use plugin::EntrySchema;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Key(String),
    /// An array level; some/all/index selectors all descend one level.
    AnyElement,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EndQualifier {
    Primitive,
    Object,
    Array,
}

/// An ordered chain of object keys and array selectors, ending with a
/// type qualifier.
#[derive(Debug, Clone, PartialEq)]
pub struct KeySequence {
    pub segments: Vec<Segment>,
    pub end: EndQualifier,
}

impl KeySequence {
    pub fn new(segments: Vec<Segment>, end: EndQualifier) -> Self {
        Self { segments, end }
    }

    /// The witness document for this key sequence. An empty object is
    /// deliberately not "any object": munged schemas keep
    /// `minProperties >= 1` where properties were required, so `-empty`
    /// style queries don't spuriously match.
    pub fn to_document(&self) -> Value {
        let mut document = match self.end {
            EndQualifier::Primitive => Value::Null,
            EndQualifier::Object => Value::Object(serde_json::Map::new()),
            EndQualifier::Array => Value::Array(Vec::new()),
        };
        for segment in self.segments.iter().rev() {
            document = match segment {
                Segment::Key(key) => {
                    let mut object = serde_json::Map::new();
                    object.insert(key.to_uppercase(), document);
                    Value::Object(object)
                }
                Segment::AnyElement => Value::Array(vec![document]),
            };
        }
        document
    }
}

/// The schema projection of a `meta` value predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaProjection {
    Sequence(KeySequence),
    And(Vec<MetaProjection>),
    Or(Vec<MetaProjection>),
}

impl MetaProjection {
    /// Derives the projection of a value predicate. Negations project
    /// to their positive form: `NOT p` inverts only the evaluation
    /// result, never the schema projection, because a type-preserving
    /// negation still requires the same shape of value to exist.
    pub fn of(expr: &ValueExpr) -> MetaProjection {
        project(expr, &[])
    }

    fn eval(&self, validator: &jsonschema::Validator) -> bool {
        match self {
            MetaProjection::Sequence(sequence) => validator.is_valid(&sequence.to_document()),
            MetaProjection::And(projections) => projections.iter().all(|p| p.eval(validator)),
            MetaProjection::Or(projections) => projections.iter().any(|p| p.eval(validator)),
        }
    }
}

fn project(expr: &ValueExpr, prefix: &[Segment]) -> MetaProjection {
    match expr {
        Expr::And(operands) => {
            MetaProjection::And(operands.iter().map(|o| project(o, prefix)).collect())
        }
        Expr::Or(operands) => {
            MetaProjection::Or(operands.iter().map(|o| project(o, prefix)).collect())
        }
        Expr::Not(inner) => project(inner, prefix),
        Expr::Atom(atom) => project_atom(atom, prefix),
    }
}

fn project_atom(atom: &ValuePredicate, prefix: &[Segment]) -> MetaProjection {
    let sequence = |end| MetaProjection::Sequence(KeySequence::new(prefix.to_vec(), end));
    match atom {
        ValuePredicate::Null
        | ValuePredicate::Boolean(_)
        | ValuePredicate::Numeric(_)
        | ValuePredicate::Time(_)
        | ValuePredicate::String(_) => sequence(EndQualifier::Primitive),
        ValuePredicate::Empty { .. } => MetaProjection::Or(vec![
            sequence(EndQualifier::Object),
            sequence(EndQualifier::Array),
        ]),
        ValuePredicate::Object(CollectionPredicate::Size(_)) => sequence(EndQualifier::Object),
        ValuePredicate::Array(CollectionPredicate::Size(_)) => sequence(EndQualifier::Array),
        ValuePredicate::Object(CollectionPredicate::Element {
            selector,
            predicate,
        }) => {
            let mut extended = prefix.to_vec();
            if let Selector::Key(key) = selector {
                extended.push(Segment::Key(key.clone()));
            }
            project(predicate, &extended)
        }
        ValuePredicate::Array(CollectionPredicate::Element { predicate, .. }) => {
            let mut extended = prefix.to_vec();
            extended.push(Segment::AnyElement);
            project(predicate, &extended)
        }
    }
}

/// A predicate over entry schemas. `True` never prunes; combinators
/// are strict; `meta` and `kind` leaves carry their own negation
/// semantics.
#[derive(Debug, Clone)]
pub enum SchemaPredicate {
    True,
    Meta(MetaProjection),
    Kind { matcher: GlobMatcher, negated: bool },
    And(Vec<SchemaPredicate>),
    Or(Vec<SchemaPredicate>),
    Not(Box<SchemaPredicate>),
}

impl SchemaPredicate {
    /// Evaluates against a schema node. `validator` is the compiled
    /// munged metadata schema for the node, or None when the node
    /// doesn't document one — in which case meta projections accept
    /// the node rather than prune it.
    pub fn eval(&self, node: &EntrySchema, validator: Option<&jsonschema::Validator>) -> bool {
        match self {
            SchemaPredicate::True => true,
            SchemaPredicate::Meta(projection) => match validator {
                Some(validator) => projection.eval(validator),
                None => true,
            },
            SchemaPredicate::Kind { matcher, negated } => {
                let matched = node.paths_to_node().iter().any(|path| matcher.is_match(path));
                matched != *negated
            }
            SchemaPredicate::And(operands) => operands.iter().all(|o| o.eval(node, validator)),
            SchemaPredicate::Or(operands) => operands.iter().any(|o| o.eval(node, validator)),
            SchemaPredicate::Not(inner) => !inner.eval(node, validator),
        }
    }
}

/// Compiles the munged metadata schema of a node, or None when the
/// node doesn't document one (or its schema doesn't compile, which is
/// logged and treated as undocumented).
pub fn metadata_validator(node: &EntrySchema) -> Option<jsonschema::Validator> {
    let schema = node.effective_metadata_schema()?;
    let munged = schema.munged().to_value();
    match jsonschema::validator_for(&munged) {
        Ok(validator) => Some(validator),
        Err(err) => {
            tracing::warn!(
                type_id = node.type_id,
                error = %err,
                "metadata schema does not compile; skipping schema pruning for this type"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugin::JsonSchema;

    fn parse(raw: serde_json::Value) -> ValueExpr {
        ValueExpr::unmarshal(&raw).unwrap()
    }

    #[test]
    fn key_sequences_encode_as_witness_documents() {
        let sequence = KeySequence::new(
            vec![
                Segment::Key("key1".to_string()),
                Segment::Key("key2".to_string()),
            ],
            EndQualifier::Primitive,
        );
        assert_eq!(
            sequence.to_document(),
            serde_json::json!({"KEY1": {"KEY2": null}})
        );

        let sequence = KeySequence::new(
            vec![Segment::Key("tags".to_string()), Segment::AnyElement],
            EndQualifier::Object,
        );
        assert_eq!(sequence.to_document(), serde_json::json!({"TAGS": [{}]}));
    }

    #[test]
    fn projections_take_the_positive_form() {
        let positive = parse(serde_json::json!(
            ["object", [["key", "foo"], ["number", ["=", "1"]]]]
        ));
        let negated = parse(serde_json::json!(
            ["NOT", ["object", [["key", "foo"], ["number", ["=", "1"]]]]]
        ));
        assert_eq!(MetaProjection::of(&positive), MetaProjection::of(&negated));
    }

    fn munged_validator(schema: serde_json::Value) -> jsonschema::Validator {
        let schema: JsonSchema = serde_json::from_value(schema).unwrap();
        jsonschema::validator_for(&schema.munged().to_value()).unwrap()
    }

    #[test]
    fn meta_projections_validate_against_munged_schemas() {
        let validator = munged_validator(serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "foo": {"type": "number"},
                "tags": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "additionalProperties": false,
                        "properties": {"key": {"type": "string"}},
                    },
                },
            },
        }));

        let holds = |raw: serde_json::Value| {
            MetaProjection::of(&parse(raw)).eval(&validator)
        };

        assert!(holds(serde_json::json!(
            ["object", [["key", "foo"], ["number", ["=", "1"]]]]
        )));
        // Key lookup is case-insensitive, so FOO works too.
        assert!(holds(serde_json::json!(
            ["object", [["key", "FOO"], ["number", ["=", "1"]]]]
        )));
        // "bar" isn't in the schema.
        assert!(!holds(serde_json::json!(
            ["object", [["key", "bar"], ["number", ["=", "1"]]]]
        )));
        // "foo" is a primitive, not an array.
        assert!(!holds(serde_json::json!(
            ["object", [["key", "foo"], ["array", ["some", null]]]]
        )));
        // Descending through the tags array to its key.
        assert!(holds(serde_json::json!(
            ["object", [["key", "tags"],
                ["array", ["some", ["object", [["key", "key"], ["string", ["=", "x"]]]]]]]]
        )));
        assert!(!holds(serde_json::json!(
            ["object", [["key", "tags"],
                ["array", ["some", ["object", [["key", "nope"], ["string", ["=", "x"]]]]]]]]
        )));
    }

    #[test]
    fn required_objects_reject_emptiness_probes() {
        // The munge forces minProperties >= 1 because the schema
        // required a property, so the `{}` witness of an
        // object-emptiness query must not validate.
        let validator = munged_validator(serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["foo"],
            "properties": {"foo": {"type": "number"}},
        }));
        let empty_probe = KeySequence::new(vec![], EndQualifier::Object);
        assert!(!validator.is_valid(&empty_probe.to_document()));
    }

    #[test]
    fn kind_predicates_match_label_paths() {
        let mut node = EntrySchema::new("container");
        node.type_id = "docker.Container".to_string();
        node.set_paths_to_node(vec!["docker/containers/container".to_string()]);

        let matcher = globset::Glob::new("*/container").unwrap().compile_matcher();
        let kind = SchemaPredicate::Kind {
            matcher: matcher.clone(),
            negated: false,
        };
        assert!(kind.eval(&node, None));

        let negated = SchemaPredicate::Kind {
            matcher,
            negated: true,
        };
        assert!(!negated.eval(&node, None));
    }

    #[test]
    fn missing_metadata_schemas_never_prune() {
        let node = EntrySchema::new("opaque");
        let projection = MetaProjection::of(&parse(serde_json::json!(
            ["object", [["key", "foo"], ["number", ["=", "1"]]]]
        )));
        assert!(SchemaPredicate::Meta(projection).eval(&node, None));
    }
}
