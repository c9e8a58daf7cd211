//! The query core shared by the HTTP API's RQL surface and the `find`
//! CLI: a predicate algebra over entries, schemas and JSON-shaped
//! values; the JSON wire encoding with its match/syntax parser
//! discipline; and the schema-pruned parallel walker.

pub mod entry;
pub mod expr;
pub mod munge;
pub mod numeric;
pub mod primary;
pub mod schema_predicate;
pub mod string;
pub mod time_predicate;
pub mod value;
pub mod walker;

pub use entry::Entry;
pub use expr::{Atom, Expr};
pub use numeric::{ComparisonOp, NumericAtom, UnsignedNumericAtom};
pub use primary::{Primary, Query, QueryExt};
pub use schema_predicate::{
    metadata_validator, EndQualifier, KeySequence, MetaProjection, SchemaPredicate, Segment,
};
pub use string::StringAtom;
pub use time_predicate::TimeAtom;
pub use value::{
    CollectionPredicate, Selector, SizeExpr, ValueExpr, ValueExprExt, ValuePredicate,
};
pub use walker::{walk, Options, Pruner, Walk};
