use crate::entry::Entry;
use crate::expr::{Atom, Expr};
use crate::schema_predicate::{MetaProjection, SchemaPredicate};
use crate::string::StringAtom;
use crate::value::{eval_size, SizeExpr, ValueExpr, ValueExprExt};
use bigdecimal::BigDecimal;
use globset::{Glob, GlobMatcher};
use plugin::{Action, ActionSet, EntrySchema, Error};
use serde_json::Value;

/// An entry-predicate atom: the primaries shared by the RQL and find
/// surfaces.
#[derive(Debug, Clone)]
pub enum Primary {
    /// A literal; the compile target of find's -true/-false.
    Boolean(bool),
    /// Lifts a value predicate onto the entry's metadata.
    Meta(ValueExpr),
    Name(Expr<StringAtom>),
    /// On the entry's size attribute. With `blocks` set (find's
    /// unsuffixed `-size n`) the attribute is compared in 512-byte
    /// blocks, rounded up.
    Size { predicate: SizeExpr, blocks: bool },
    Action(Action),
    /// Matches the schema node's label chains. Requires the plugin to
    /// document a schema.
    Kind { pattern: String, matcher: GlobMatcher },
}

impl Primary {
    pub fn size(predicate: SizeExpr) -> Self {
        Primary::Size {
            predicate,
            blocks: false,
        }
    }

    pub fn kind(pattern: &str) -> Result<Self, Error> {
        let matcher = Glob::new(pattern)
            .map_err(|err| Error::SyntaxError(format!("invalid glob: {err}")))?
            .compile_matcher();
        Ok(Primary::Kind {
            pattern: pattern.to_string(),
            matcher,
        })
    }

    fn eval(&self, entry: &Entry, schema: Option<&EntrySchema>) -> bool {
        match self {
            Primary::Boolean(literal) => *literal,
            Primary::Meta(predicate) => predicate.eval(&entry.metadata),
            Primary::Name(predicate) => eval_string_expr(predicate, &entry.name),
            Primary::Size { predicate, blocks } => match entry.attributes.size {
                Some(size) => {
                    let value = if *blocks { size.saturating_add(511) / 512 } else { size };
                    eval_size(predicate, BigDecimal::from(value))
                }
                None => false,
            },
            Primary::Action(action) => entry.supports(*action),
            Primary::Kind { matcher, .. } => schema.is_some_and(|node| {
                node.paths_to_node().iter().any(|path| matcher.is_match(path))
            }),
        }
    }

    fn required_actions(&self) -> ActionSet {
        match self {
            Primary::Action(action) => ActionSet::from(*action),
            _ => ActionSet::default(),
        }
    }

    fn projection(&self, negated: bool) -> SchemaPredicate {
        match self {
            Primary::Meta(predicate) => SchemaPredicate::Meta(MetaProjection::of(predicate)),
            Primary::Kind { matcher, .. } => SchemaPredicate::Kind {
                matcher: matcher.clone(),
                negated,
            },
            _ => SchemaPredicate::True,
        }
    }
}

impl PartialEq for Primary {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Primary::Boolean(a), Primary::Boolean(b)) => a == b,
            (Primary::Meta(a), Primary::Meta(b)) => a == b,
            (Primary::Name(a), Primary::Name(b)) => a == b,
            (
                Primary::Size {
                    predicate: a,
                    blocks: ab,
                },
                Primary::Size {
                    predicate: b,
                    blocks: bb,
                },
            ) => a == b && ab == bb,
            (Primary::Action(a), Primary::Action(b)) => a == b,
            (Primary::Kind { pattern: a, .. }, Primary::Kind { pattern: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Atom for Primary {
    fn marshal(&self) -> Value {
        match self {
            Primary::Boolean(literal) => Value::Bool(*literal),
            Primary::Meta(predicate) => serde_json::json!(["meta", predicate.marshal()]),
            Primary::Name(predicate) => serde_json::json!(["name", predicate.marshal()]),
            Primary::Size { predicate, .. } => serde_json::json!(["size", predicate.marshal()]),
            Primary::Action(action) => serde_json::json!(["action", action.name()]),
            Primary::Kind { pattern, .. } => serde_json::json!(["kind", pattern]),
        }
    }

    fn unmarshal(value: &Value) -> Result<Self, Error> {
        if let Value::Bool(literal) = value {
            return Ok(Primary::Boolean(*literal));
        }
        let Value::Array(items) = value else {
            return Err(Error::MatchError("expected a primary".to_string()));
        };
        let Some(tag @ ("meta" | "name" | "size" | "action" | "kind")) =
            items.first().and_then(Value::as_str)
        else {
            return Err(Error::MatchError("expected a primary".to_string()));
        };
        if items.len() != 2 {
            return Err(Error::SyntaxError(format!(
                "{tag} must be formatted as [\"{tag}\", <predicate>]"
            )));
        }
        let payload = &items[1];
        match tag {
            "meta" => ValueExpr::unmarshal(payload)
                .map(Primary::Meta)
                .map_err(|err| syntaxify(tag, err)),
            "name" => Expr::<StringAtom>::unmarshal(payload)
                .map(Primary::Name)
                .map_err(|err| syntaxify(tag, err)),
            "size" => SizeExpr::unmarshal(payload)
                .map(Primary::size)
                .map_err(|err| syntaxify(tag, err)),
            "action" => match payload.as_str().and_then(Action::from_name) {
                Some(action) => Ok(Primary::Action(action)),
                None => Err(Error::SyntaxError(format!(
                    "{payload} is an invalid action; valid actions are {}",
                    Action::ALL.map(|a| a.name()).join(", ")
                ))),
            },
            _ => match payload.as_str() {
                Some(pattern) => Primary::kind(pattern),
                None => Err(Error::SyntaxError(format!(
                    "kind: expected a glob, got {payload}"
                ))),
            },
        }
    }
}

fn syntaxify(tag: &str, err: Error) -> Error {
    match err {
        Error::MatchError(message) => {
            Error::SyntaxError(format!("error unmarshalling the {tag} predicate: {message}"))
        }
        other => other,
    }
}

fn eval_string_expr(expr: &Expr<StringAtom>, value: &str) -> bool {
    match expr {
        Expr::Atom(atom) => atom.eval(value),
        Expr::And(operands) => operands.iter().all(|o| eval_string_expr(o, value)),
        Expr::Or(operands) => operands.iter().any(|o| eval_string_expr(o, value)),
        Expr::Not(inner) => !eval_string_expr(inner, value),
    }
}

/// A compiled query: an expression over primaries.
pub type Query = Expr<Primary>;

pub trait QueryExt {
    /// Entry-level evaluation, ignoring the required-action set.
    fn eval(&self, entry: &Entry, schema: Option<&EntrySchema>) -> bool;
    /// The actions an entry must support for this query to hold:
    /// ∩ under AND, ∪ under OR, complement under NOT.
    fn required_actions(&self) -> ActionSet;
    /// Full satisfaction: required actions are supported and the
    /// predicate holds.
    fn satisfied_by(&self, entry: &Entry, schema: Option<&EntrySchema>) -> bool;
    /// Whether the query needs a schema to be meaningful (it contains a
    /// kind primary). Entries of schema-less plugins never satisfy such
    /// queries.
    fn requires_schema(&self) -> bool;
    /// The schema projection the walker prunes with.
    fn schema_projection(&self) -> SchemaPredicate;
}

impl QueryExt for Query {
    fn eval(&self, entry: &Entry, schema: Option<&EntrySchema>) -> bool {
        match self {
            Expr::Atom(primary) => primary.eval(entry, schema),
            Expr::And(operands) => operands.iter().all(|o| o.eval(entry, schema)),
            Expr::Or(operands) => operands.iter().any(|o| o.eval(entry, schema)),
            Expr::Not(inner) => !inner.eval(entry, schema),
        }
    }

    fn required_actions(&self) -> ActionSet {
        match self {
            Expr::Atom(primary) => primary.required_actions(),
            Expr::And(operands) => operands
                .iter()
                .map(|o| o.required_actions())
                .fold(ActionSet::all(), |acc, set| acc & set),
            Expr::Or(operands) => operands
                .iter()
                .map(|o| o.required_actions())
                .fold(ActionSet::default(), |acc, set| acc | set),
            Expr::Not(inner) => inner.required_actions().complement(),
        }
    }

    fn satisfied_by(&self, entry: &Entry, schema: Option<&EntrySchema>) -> bool {
        let supported: ActionSet = entry
            .actions
            .iter()
            .filter_map(|name| Action::from_name(name))
            .collect();
        self.required_actions().is_subset(supported) && self.eval(entry, schema)
    }

    fn requires_schema(&self) -> bool {
        self.atoms()
            .iter()
            .any(|primary| matches!(primary, Primary::Kind { .. }))
    }

    fn schema_projection(&self) -> SchemaPredicate {
        match self {
            Expr::Atom(primary) => primary.projection(false),
            Expr::And(operands) => {
                SchemaPredicate::And(operands.iter().map(|o| o.schema_projection()).collect())
            }
            Expr::Or(operands) => {
                SchemaPredicate::Or(operands.iter().map(|o| o.schema_projection()).collect())
            }
            Expr::Not(inner) => match inner.as_ref() {
                // Leaf negations keep their own semantics: a negated
                // meta projection is unchanged, a negated kind matches
                // when no path does, and non-pruning leaves stay
                // non-pruning.
                Expr::Atom(primary) => match primary {
                    Primary::Kind { .. } => primary.projection(true),
                    Primary::Meta(_) => primary.projection(false),
                    _ => SchemaPredicate::True,
                },
                _ => SchemaPredicate::Not(Box::new(inner.schema_projection())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugin::EntryAttributes;

    fn entry(name: &str, size: Option<u64>, actions: &[&str]) -> Entry {
        let mut attributes = EntryAttributes::new();
        attributes.size = size;
        Entry {
            type_id: "test.Entry".to_string(),
            path: name.to_string(),
            actions: actions.iter().map(|s| s.to_string()).collect(),
            name: name.to_string(),
            cname: name.to_string(),
            attributes,
            metadata: serde_json::json!({}),
        }
    }

    fn parse(raw: serde_json::Value) -> Query {
        Query::unmarshal(&raw).unwrap()
    }

    #[test]
    fn name_size_and_action_primaries() {
        let e = entry("web", Some(2048), &["list", "exec"]);

        assert!(parse(serde_json::json!(["name", ["glob", "w*"]])).satisfied_by(&e, None));
        assert!(!parse(serde_json::json!(["name", ["=", "db"]])).satisfied_by(&e, None));
        assert!(parse(serde_json::json!(["size", [">", "1024"]])).satisfied_by(&e, None));
        assert!(!parse(serde_json::json!(["size", [">", "4096"]])).satisfied_by(&e, None));
        assert!(parse(serde_json::json!(["action", "exec"])).satisfied_by(&e, None));
        assert!(!parse(serde_json::json!(["action", "delete"])).satisfied_by(&e, None));

        // No size attribute: size predicates are false.
        let sizeless = entry("web", None, &["list"]);
        assert!(!parse(serde_json::json!(["size", [">", "0"]])).satisfied_by(&sizeless, None));
    }

    #[test]
    fn meta_primaries_see_entry_metadata() {
        let mut e = entry("i-123", None, &["metadata"]);
        e.metadata = serde_json::json!({"architecture": "x86_64"});

        let q = parse(serde_json::json!(
            ["meta", ["object", [["key", "architecture"], ["string", ["=", "x86_64"]]]]]
        ));
        assert!(q.satisfied_by(&e, None));
        assert!(!Expr::not(q).satisfied_by(&e, None));
    }

    #[test]
    fn kind_requires_a_schema() {
        let e = entry("web", None, &["list"]);
        let q = parse(serde_json::json!(["kind", "*container"]));
        assert!(q.requires_schema());
        assert!(!q.satisfied_by(&e, None));

        let mut node = EntrySchema::new("container");
        node.set_paths_to_node(vec!["docker/containers/container".to_string()]);
        assert!(q.satisfied_by(&e, Some(&node)));
    }

    #[test]
    fn required_actions_compose() {
        let exec = parse(serde_json::json!(["action", "exec"]));
        let list = parse(serde_json::json!(["action", "list"]));

        let both = exec.clone().combine_or(list.clone());
        let required = both.required_actions();
        assert!(required.contains(Action::Exec) && required.contains(Action::List));

        let intersect = exec.clone().combine_and(list).required_actions();
        assert!(intersect.is_empty());

        let complement = Expr::not(exec).required_actions();
        assert!(!complement.contains(Action::Exec));
        assert!(complement.contains(Action::List));
    }

    #[test]
    fn round_trips() {
        let queries = [
            serde_json::json!(true),
            serde_json::json!(["name", ["glob", "foo*"]]),
            serde_json::json!(["action", "exec"]),
            serde_json::json!(["kind", "*/container"]),
            serde_json::json!(["AND", ["size", [">", "1024"]], ["NOT", ["name", ["=", "x"]]]]),
            serde_json::json!(
                ["meta", ["object", [["key", "architecture"], ["string", ["=", "x86_64"]]]]]
            ),
        ];
        for raw in queries {
            let parsed = parse(raw.clone());
            assert_eq!(parsed.marshal(), raw, "{raw}");
            assert_eq!(Query::unmarshal(&parsed.marshal()).unwrap(), parsed);
        }
    }

    #[test]
    fn double_negation_is_semantically_identity() {
        let e = entry("web", Some(100), &["list"]);
        let q = parse(serde_json::json!(["name", ["=", "web"]]));
        let double = Expr::not(Expr::not(q.clone()));
        assert_eq!(q.eval(&e, None), double.eval(&e, None));
    }

    #[test]
    fn invalid_actions_are_syntax_errors() {
        let err = Query::unmarshal(&serde_json::json!(["action", "mount"])).unwrap_err();
        assert!(matches!(err, Error::SyntaxError(_)), "got {err:?}");
    }

    #[test]
    fn unknown_primaries_are_match_errors() {
        let err = Query::unmarshal(&serde_json::json!(["path", ["=", "x"]])).unwrap_err();
        assert!(err.is_match_error(), "got {err:?}");
    }
}
