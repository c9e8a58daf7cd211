use crate::action::{Action, ActionSet};
use crate::dispatch::{Context, Dispatcher};
use crate::entry::{Entry, EntryBase, OpCode, Ttl};
use crate::error::{Error, Result};
use crate::external::init_external_plugin;
use crate::schema::{EntrySchema, SchemaGraph};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

const REGISTRY_TYPE_ID: &str = "wash.Registry";

/// The plugin registry: the root of the virtual tree. Its children are
/// the registered plugin roots, and its schema graph is a `mountpoint`
/// node followed by every plugin's graph.
#[derive(Debug)]
pub struct Registry {
    base: EntryBase,
    plugins: IndexMap<String, Arc<dyn Entry>>,
    graphs: HashMap<String, Option<SchemaGraph>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        // The registry is never listed as a child, so its name is only
        // cosmetic; listing it is always fresh.
        let base = EntryBase::new("/", REGISTRY_TYPE_ID).with_ttl(OpCode::List, Ttl::Never);
        base.set_id("/".to_string());
        Self {
            base,
            plugins: IndexMap::new(),
            graphs: HashMap::new(),
        }
    }

    /// Registers an in-process plugin root. The root's schema graph, if
    /// it documents one, is built here; inconsistencies are fatal.
    pub fn register(&mut self, root: Arc<dyn Entry>) -> Result<()> {
        let name = root.base().cname();
        if self.plugins.contains_key(&name) {
            return Err(Error::BadRequest(format!(
                "a plugin named {name} is already registered"
            )));
        }
        root.base().set_id(format!("/{name}"));
        let mut graph = SchemaGraph::build(root.as_ref())?;
        if let (Some(graph), Some(types)) = (graph.as_mut(), root.base().wrapped_types()) {
            graph.apply_wrapped_types(types);
        }
        self.graphs.insert(name.clone(), graph);
        self.plugins.insert(name, root);
        Ok(())
    }

    /// Registers an external plugin: spawns its script's `init` op and
    /// decodes the returned root.
    pub async fn register_external(
        &mut self,
        name: &str,
        script_path: impl Into<PathBuf>,
        config: &serde_json::Value,
    ) -> Result<()> {
        let (root, graph) = init_external_plugin(script_path, name, config).await?;
        if self.plugins.contains_key(name) {
            return Err(Error::BadRequest(format!(
                "a plugin named {name} is already registered"
            )));
        }
        root.base().set_id(format!("/{name}"));
        self.graphs.insert(name.to_string(), graph);
        self.plugins.insert(name.to_string(), root);
        Ok(())
    }

    pub fn plugins(&self) -> &IndexMap<String, Arc<dyn Entry>> {
        &self.plugins
    }

    /// The graph of the whole mountpoint: the registry's own node
    /// first, then every plugin root's graph merged in.
    pub fn schema_graph(&self) -> SchemaGraph {
        let mut node = EntrySchema::new("mountpoint").singleton();
        node.type_id = REGISTRY_TYPE_ID.to_string();
        node.actions = self.capabilities().names();
        node.children = self
            .plugins
            .iter()
            .filter_map(|(name, _)| {
                self.graphs
                    .get(name)
                    .and_then(|g| g.as_ref())
                    .and_then(|g| g.root())
                    .map(|root| root.type_id.clone())
            })
            .collect();

        let mut graph = SchemaGraph::default();
        graph.insert(node);
        for (name, _) in &self.plugins {
            if let Some(Some(plugin_graph)) = self.graphs.get(name) {
                graph.merge(plugin_graph);
            }
        }
        graph
    }

    /// The schema graph of the plugin owning `entry`, or None when the
    /// plugin doesn't document one.
    pub fn plugin_graph(&self, entry: &dyn Entry) -> Option<&SchemaGraph> {
        let plugin = entry.base().plugin_name()?;
        self.graphs.get(plugin).and_then(|g| g.as_ref())
    }

    /// The subgraph describing `entry` itself, serving its Schema
    /// operation.
    pub fn schema_for(&self, entry: &dyn Entry) -> Option<SchemaGraph> {
        if entry.base().id() == Some("/") {
            return Some(self.schema_graph());
        }
        self.plugin_graph(entry)
            .and_then(|graph| graph.subgraph(entry.base().type_id()))
    }

    /// Resolves `path` to an entry by walking cached lists from the
    /// mountpoint.
    pub async fn find_entry(
        self: &Arc<Self>,
        dispatcher: &Dispatcher,
        ctx: &Context,
        path: &str,
    ) -> Result<Arc<dyn Entry>> {
        if !path.starts_with('/') {
            return Err(Error::BadRequest(format!(
                "{path} is not an absolute path"
            )));
        }
        let mut current: Arc<dyn Entry> = self.clone();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let entries = dispatcher.cached_list(ctx, &current).await?;
            current = entries.get(segment).cloned().ok_or_else(|| Error::NotFound {
                path: path.to_string(),
            })?;
        }
        Ok(current)
    }
}

#[async_trait]
impl Entry for Registry {
    fn base(&self) -> &EntryBase {
        &self.base
    }

    fn capabilities(&self) -> ActionSet {
        [Action::List, Action::Schema].into_iter().collect()
    }

    async fn list(&self, _ctx: &Context) -> Result<Vec<Arc<dyn Entry>>> {
        Ok(self.plugins.values().cloned().collect())
    }
}
