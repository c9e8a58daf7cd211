//! The entry model at the heart of the virtual tree: polymorphic
//! entries with action capabilities, canonical naming and framework
//! assigned identity; per-plugin schema graphs; and the cached
//! operation dispatchers that tie entries to the datastore.

pub mod action;
pub mod attributes;
pub mod dispatch;
pub mod entry;
pub mod error;
pub mod external;
pub mod json_schema;
pub mod registry;
pub mod schema;

pub use action::{Action, ActionSet};
pub use attributes::{EntryAttributes, JsonObject};
pub use dispatch::{op_keys_regex, Context, Dispatcher, EntryMap, DEFAULT_TIMEOUT};
pub use entry::{
    ByteStream, Entry, EntryBase, ExecResult, OpCode, SignalSchema, Ttl, WrappedTypes,
    DEFAULT_SLASH_REPLACER,
};
pub use error::{Error, Result};
pub use json_schema::JsonSchema;
pub use registry::Registry;
pub use schema::{EntrySchema, SchemaGraph};
