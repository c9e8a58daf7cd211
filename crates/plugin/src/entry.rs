use crate::action::{Action, ActionSet};
use crate::attributes::{EntryAttributes, JsonObject};
use crate::dispatch::Context;
use crate::error::{Error, Result};
use crate::json_schema::JsonSchema;
use crate::schema::EntrySchema;
use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// The slash replacer used when an entry doesn't configure its own.
/// '#' is unlikely to appear in a meaningful entry name.
pub const DEFAULT_SLASH_REPLACER: char = '#';

/// Operations with framework-managed caching. User-defined ops go
/// through `Dispatcher::cached_op` with an explicit name and TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    List,
    Open,
    Metadata,
    Schema,
}

impl OpCode {
    pub const ALL: [OpCode; 4] = [OpCode::List, OpCode::Open, OpCode::Metadata, OpCode::Schema];

    pub fn name(&self) -> &'static str {
        match self {
            OpCode::List => "List",
            OpCode::Open => "Open",
            OpCode::Metadata => "Metadata",
            OpCode::Schema => "Schema",
        }
    }
}

/// Per-operation cache policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ttl {
    /// Cache with the store's default window.
    #[default]
    Default,
    /// Cache for the given duration.
    For(Duration),
    /// Never cache this operation's result.
    Never,
}

/// Schemas substituted for the given type keys when computing an
/// entry's structural metadata schema.
pub type WrappedTypes = Arc<IndexMap<String, JsonSchema>>;

/// A signal (or signal group) an entry accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Present for signal groups; matches the group's member signals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

impl SignalSchema {
    /// Signal-group regexes must compile at registration time.
    pub fn validate(&self) -> Result<()> {
        if let Some(pattern) = &self.regex {
            regex::Regex::new(pattern)
                .map_err(|err| Error::SyntaxError(format!("signal {}: {}", self.name, err)))?;
        }
        Ok(())
    }
}

/// State common to every entry: its name, attributes, cache policy and
/// the framework-assigned identity. Plugins construct one with
/// [EntryBase::new] and hand it back from [Entry::base].
#[derive(Debug, Clone)]
pub struct EntryBase {
    name: String,
    type_id: String,
    attributes: EntryAttributes,
    slash_replacer: char,
    ttls: [Ttl; 4],
    // Assigned exactly once by the framework: at registration for
    // plugin roots, in cached_list for everything else.
    id: OnceLock<String>,
    wrapped_types: OnceLock<WrappedTypes>,
}

impl EntryBase {
    /// `type_id` must be unique within the plugin; it keys the entry's
    /// node in the schema graph.
    pub fn new(name: impl Into<String>, type_id: impl Into<String>) -> Self {
        let name = name.into();
        assert!(!name.is_empty(), "EntryBase::new: entry name is empty");
        Self {
            name,
            type_id: type_id.into(),
            attributes: EntryAttributes::default(),
            slash_replacer: DEFAULT_SLASH_REPLACER,
            ttls: [Ttl::Default; 4],
            id: OnceLock::new(),
            wrapped_types: OnceLock::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: EntryAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Overrides the default '#' slash replacer.
    pub fn with_slash_replacer(mut self, replacer: char) -> Self {
        self.slash_replacer = replacer;
        self
    }

    pub fn with_ttl(mut self, op: OpCode, ttl: Ttl) -> Self {
        self.set_ttl(op, ttl);
        self
    }

    pub fn with_wrapped_types(self, types: WrappedTypes) -> Self {
        let _ = self.wrapped_types.set(types);
        self
    }

    pub fn set_ttl(&mut self, op: OpCode, ttl: Ttl) {
        self.ttls[op as usize] = ttl;
    }

    /// Disables caching for every default operation.
    pub fn disable_default_caching(mut self) -> Self {
        for op in OpCode::ALL {
            self.set_ttl(op, Ttl::Never);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    pub fn attributes(&self) -> &EntryAttributes {
        &self.attributes
    }

    pub fn slash_replacer(&self) -> char {
        self.slash_replacer
    }

    pub fn ttl_of(&self, op: OpCode) -> Ttl {
        self.ttls[op as usize]
    }

    /// The entry's canonical name: its name with every '/' replaced by
    /// the slash replacer. CNames must be unique among siblings; that
    /// uniqueness is checked in cached_list.
    pub fn cname(&self) -> String {
        self.name
            .replace('/', &self.slash_replacer.to_string())
    }

    /// The entry's absolute path rooted at the mountpoint, or None if
    /// the framework hasn't listed it yet.
    pub fn id(&self) -> Option<&str> {
        self.id.get().map(String::as_str)
    }

    /// The plugin owning this entry: the first segment of its id.
    pub fn plugin_name(&self) -> Option<&str> {
        self.id()
            .map(|id| id.trim_start_matches('/'))
            .and_then(|id| id.split('/').next())
    }

    pub(crate) fn set_id(&self, id: String) {
        if self.id.set(id.clone()).is_err() {
            let existing = self.id.get().map(String::as_str).unwrap_or_default();
            assert_eq!(
                existing, id,
                "entry {} was assigned two different ids",
                self.name
            );
        }
    }

    pub fn wrapped_types(&self) -> Option<&WrappedTypes> {
        self.wrapped_types.get()
    }

    pub(crate) fn inherit_wrapped_types(&self, types: &WrappedTypes) {
        // First writer wins; an entry that declared its own keeps it.
        let _ = self.wrapped_types.set(types.clone());
    }
}

/// Output of the Exec action.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: Bytes,
    pub stderr: Bytes,
}

/// A byte stream returned by the Stream action.
pub type ByteStream = Box<dyn tokio::io::AsyncRead + Send + Unpin>;

/// An addressable node in the virtual tree. Implementations override
/// the operations matching their declared capabilities; a declared
/// capability whose operation isn't overridden fails with
/// UnsupportedAction.
#[async_trait]
pub trait Entry: std::fmt::Debug + Send + Sync + 'static {
    fn base(&self) -> &EntryBase;

    /// The actions this entry supports.
    fn capabilities(&self) -> ActionSet;

    /// This entry's node in the schema graph, children unset. None
    /// means the plugin doesn't document its hierarchy.
    fn entry_schema(&self) -> Option<EntrySchema> {
        None
    }

    /// Template entries describing this entry's possible children,
    /// used to walk the schema graph. Only consulted when the entry
    /// supports List.
    fn child_templates(&self) -> Vec<Box<dyn Entry>> {
        Vec::new()
    }

    fn signals(&self) -> Vec<SignalSchema> {
        Vec::new()
    }

    async fn list(&self, _ctx: &Context) -> Result<Vec<Arc<dyn Entry>>> {
        Err(self.unsupported(Action::List))
    }

    async fn open(&self, _ctx: &Context) -> Result<Bytes> {
        Err(self.unsupported(Action::Open))
    }

    async fn read(&self, _ctx: &Context) -> Result<Bytes> {
        Err(self.unsupported(Action::Read))
    }

    async fn stream(&self, _ctx: &Context) -> Result<ByteStream> {
        Err(self.unsupported(Action::Stream))
    }

    async fn exec(&self, _ctx: &Context, _cmd: &str, _args: &[String]) -> Result<ExecResult> {
        Err(self.unsupported(Action::Exec))
    }

    /// Returns true if the entry was deleted now; false if deletion
    /// was accepted but completes asynchronously.
    async fn delete(&self, _ctx: &Context) -> Result<bool> {
        Err(self.unsupported(Action::Delete))
    }

    async fn signal(&self, _ctx: &Context, _signal: &str) -> Result<()> {
        Err(self.unsupported(Action::Signal))
    }

    async fn metadata(&self, _ctx: &Context) -> Result<JsonObject> {
        Ok(self.base().attributes().meta.clone())
    }

    fn unsupported(&self, action: Action) -> Error {
        let base = self.base();
        Error::UnsupportedAction {
            path: base.id().unwrap_or(base.name()).to_string(),
            action,
        }
    }
}
