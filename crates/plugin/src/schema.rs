use crate::action::Action;
use crate::entry::{Entry, SignalSchema, WrappedTypes};
use crate::error::{Error, Result};
use crate::json_schema::JsonSchema;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One node of a plugin's schema graph: a typed description of an
/// entry kind. Children are held by reference (type id, not embedded)
/// so the graph can have shared nodes and cycles — a volume directory
/// whose children include itself, for example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySchema {
    pub type_id: String,
    pub label: String,
    #[serde(default)]
    pub singleton: bool,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_metadata_schema: Option<JsonSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_schema: Option<JsonSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signals: Vec<SignalSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    /// The '/'-joined label chains from the plugin root to this node.
    /// Computed when the graph is built and carried on the wire so
    /// clients can match kinds without rebuilding the graph.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    paths_to_node: Vec<String>,
}

impl EntrySchema {
    /// Every node must have a label. For singletons the label should
    /// match the entry's name.
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        assert!(!label.is_empty(), "EntrySchema::new: label is empty");
        Self {
            type_id: String::new(),
            label,
            singleton: false,
            actions: Vec::new(),
            description: None,
            partial_metadata_schema: None,
            metadata_schema: None,
            signals: Vec::new(),
            children: Vec::new(),
            paths_to_node: Vec::new(),
        }
    }

    pub fn singleton(mut self) -> Self {
        self.singleton = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_partial_metadata_schema(mut self, schema: JsonSchema) -> Self {
        self.partial_metadata_schema = Some(schema);
        self
    }

    pub fn with_metadata_schema(mut self, schema: JsonSchema) -> Self {
        self.metadata_schema = Some(schema);
        self
    }

    pub fn paths_to_node(&self) -> &[String] {
        &self.paths_to_node
    }

    pub fn set_paths_to_node(&mut self, paths: Vec<String>) {
        self.paths_to_node = paths;
    }

    /// The schema describing documents returned by the Metadata
    /// operation, falling back to the partial metadata schema.
    pub fn effective_metadata_schema(&self) -> Option<&JsonSchema> {
        self.metadata_schema
            .as_ref()
            .or(self.partial_metadata_schema.as_ref())
    }
}

/// A plugin's schema graph: an insertion-ordered map from type id to
/// node, rooted at its first element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaGraph(IndexMap<String, EntrySchema>);

impl SchemaGraph {
    /// Derives the graph of an in-process plugin by walking child
    /// templates depth-first from `root`. Returns None when the root
    /// doesn't document a schema.
    ///
    /// Panics if a listable template fails to provide a schema: an
    /// undocumented child in an otherwise documented hierarchy is a
    /// plugin bug.
    pub fn build(root: &dyn Entry) -> Result<Option<SchemaGraph>> {
        if root.entry_schema().is_none() {
            return Ok(None);
        }
        let mut graph = SchemaGraph::default();
        graph.fill(root)?;
        graph.compute_paths();
        Ok(Some(graph))
    }

    fn fill(&mut self, entry: &dyn Entry) -> Result<String> {
        let mut node = entry.entry_schema().unwrap_or_else(|| {
            panic!(
                "SchemaGraph::build: entry {} does not document a schema",
                entry.base().name()
            )
        });
        node.type_id = entry.base().type_id().to_string();
        node.actions = entry.capabilities().names();
        node.signals = entry.signals();
        for signal in &node.signals {
            signal.validate()?;
        }

        let type_id = node.type_id.clone();
        if self.0.contains_key(&type_id) {
            // A shared node or a cycle: reuse the existing entry.
            return Ok(type_id);
        }
        // Insert before recursing so cyclic child references terminate.
        self.0.insert(type_id.clone(), node);

        let mut children = Vec::new();
        if entry.capabilities().contains(Action::List) {
            for template in entry.child_templates() {
                children.push(self.fill(template.as_ref())?);
            }
        }
        self.0
            .get_mut(&type_id)
            .expect("node was just inserted")
            .children = children;
        Ok(type_id)
    }

    /// Builds the graph of an external plugin from its reported node
    /// map and root type id: the subgraph reachable from `root_type_id`.
    /// A node referencing a child that's absent from the map means the
    /// plugin shipped an inconsistent schema, which is fatal at load.
    pub fn from_external(
        nodes: &IndexMap<String, EntrySchema>,
        root_type_id: &str,
    ) -> Result<SchemaGraph> {
        let mut graph = SchemaGraph::default();
        graph.populate_external(nodes, root_type_id)?;
        graph.compute_paths();
        Ok(graph)
    }

    fn populate_external(
        &mut self,
        nodes: &IndexMap<String, EntrySchema>,
        type_id: &str,
    ) -> Result<()> {
        if self.0.contains_key(type_id) {
            return Ok(());
        }
        let node = nodes.get(type_id).ok_or_else(|| {
            Error::SyntaxError(format!(
                "schema graph references type {type_id}, which is not in the graph"
            ))
        })?;
        for signal in &node.signals {
            signal.validate()?;
        }
        self.0.insert(type_id.to_string(), node.clone());
        for child in &node.children {
            self.populate_external(nodes, child)?;
        }
        Ok(())
    }

    /// The subgraph reachable from `type_id` within this graph, used to
    /// serve an entry's Schema operation.
    pub fn subgraph(&self, type_id: &str) -> Option<SchemaGraph> {
        if !self.0.contains_key(type_id) {
            return None;
        }
        let mut sub = SchemaGraph::default();
        sub.populate_external(&self.0, type_id)
            .expect("children of an existing graph always resolve");
        sub.compute_paths();
        Some(sub)
    }

    /// Merges `other`'s nodes into this graph, keeping their computed
    /// paths. Used by the registry to assemble the mountpoint graph.
    pub fn merge(&mut self, other: &SchemaGraph) {
        for (type_id, node) in &other.0 {
            self.0.entry(type_id.clone()).or_insert_with(|| node.clone());
        }
    }

    pub fn root(&self) -> Option<&EntrySchema> {
        self.0.values().next()
    }

    pub fn get(&self, type_id: &str) -> Option<&EntrySchema> {
        self.0.get(type_id)
    }

    pub fn get_mut(&mut self, type_id: &str) -> Option<&mut EntrySchema> {
        self.0.get_mut(type_id)
    }

    pub fn insert(&mut self, node: EntrySchema) {
        self.0.insert(node.type_id.clone(), node);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &EntrySchema)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Substitutes wrapped-type schemas into every node's metadata
    /// schema definitions.
    pub fn apply_wrapped_types(&mut self, types: &WrappedTypes) {
        for node in self.0.values_mut() {
            for schema in [
                node.partial_metadata_schema.as_mut(),
                node.metadata_schema.as_mut(),
            ]
            .into_iter()
            .flatten()
            {
                for (key, replacement) in types.iter() {
                    if schema.definitions.contains_key(key) {
                        schema.definitions.insert(key.clone(), replacement.clone());
                    }
                }
            }
        }
    }

    /// Fills every node's paths_to_node: the label chains of all simple
    /// (cycle-free) paths from the root.
    fn compute_paths(&mut self) {
        let Some(root_id) = self.0.keys().next().cloned() else {
            return;
        };
        let mut paths: IndexMap<String, Vec<String>> = IndexMap::new();
        let mut stack = Vec::new();
        self.visit_paths(&root_id, String::new(), &mut stack, &mut paths);
        for (type_id, node_paths) in paths {
            if let Some(node) = self.0.get_mut(&type_id) {
                node.paths_to_node = node_paths;
            }
        }
    }

    fn visit_paths(
        &self,
        type_id: &str,
        prefix: String,
        stack: &mut Vec<String>,
        paths: &mut IndexMap<String, Vec<String>>,
    ) {
        let Some(node) = self.0.get(type_id) else {
            return;
        };
        let path = if prefix.is_empty() {
            node.label.clone()
        } else {
            format!("{}/{}", prefix, node.label)
        };
        let node_paths = paths.entry(type_id.to_string()).or_default();
        if !node_paths.contains(&path) {
            node_paths.push(path.clone());
        }
        stack.push(type_id.to_string());
        for child in &node.children {
            if !stack.iter().any(|id| id == child) {
                self.visit_paths(child, path.clone(), stack, paths);
            }
        }
        stack.pop();
    }
}
