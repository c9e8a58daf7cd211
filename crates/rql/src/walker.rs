use crate::entry::Entry;
use crate::primary::{Query, QueryExt};
use crate::schema_predicate::{metadata_validator, SchemaPredicate};
use futures::future::BoxFuture;
use futures::StreamExt;
use plugin::{Action, Context, Dispatcher, EntrySchema, Error, SchemaGraph};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Traversal options. Depth is measured from the start entry (depth 0).
#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub min_depth: usize,
    pub max_depth: usize,
    /// Bound on concurrently expanded siblings.
    pub concurrency: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            min_depth: 0,
            max_depth: usize::MAX,
            concurrency: 10,
        }
    }
}

/// The result of a walk: matching entries in deterministic order
/// (parents before children, siblings sorted by name), plus the error
/// that cut the walk short, if any. Per-entry failures are logged and
/// skipped; only cancellation aborts.
#[derive(Debug)]
pub struct Walk {
    pub entries: Vec<Entry>,
    pub error: Option<Error>,
}

/// Walks the tree from `start`, yielding entries satisfying `query`.
/// Subtrees whose schemas cannot satisfy the query are pruned without
/// being listed. Emitted paths are relative to the start entry: the
/// start itself is `""`, its children are their cnames, and so on.
pub async fn walk(
    dispatcher: &Dispatcher,
    graph: &SchemaGraph,
    ctx: &Context,
    start: Arc<dyn plugin::Entry>,
    query: &Query,
    options: Options,
) -> Walk {
    let walker = Walker {
        dispatcher,
        query,
        pruner: Pruner::new(graph, query),
        requires_schema: query.requires_schema(),
        options,
    };
    let (entries, error) = walker.visit(ctx, start, String::new(), 0).await;
    Walk { entries, error }
}

/// Decides, from a query's schema projection, whether a subtree rooted
/// at a given type is worth walking. Shared by the daemon's parallel
/// walker and the CLI's client-side walker.
pub struct Pruner<'g> {
    graph: &'g SchemaGraph,
    schema_predicate: SchemaPredicate,
    // Munged metadata-schema validators, compiled once per type.
    validators: Mutex<HashMap<String, Option<Arc<jsonschema::Validator>>>>,
}

impl<'g> Pruner<'g> {
    pub fn new(graph: &'g SchemaGraph, query: &Query) -> Self {
        Self {
            graph,
            schema_predicate: query.schema_projection(),
            validators: Mutex::new(HashMap::new()),
        }
    }

    pub fn node(&self, type_id: &str) -> Option<&'g EntrySchema> {
        self.graph.get(type_id)
    }

    /// True when some schema node reachable from `node` — itself
    /// included — satisfies the projection. A conjunct satisfied only
    /// at a descendant still means the subtree is worth walking.
    pub fn subtree_satisfies(&self, node: &EntrySchema) -> bool {
        self.satisfies_rec(node, &mut std::collections::HashSet::new())
    }

    fn satisfies_rec(
        &self,
        node: &EntrySchema,
        visited: &mut std::collections::HashSet<String>,
    ) -> bool {
        if !visited.insert(node.type_id.clone()) {
            return false;
        }
        let validator = self.validator_for(node);
        if self.schema_predicate.eval(node, validator.as_deref()) {
            return true;
        }
        node.children.iter().any(|child| {
            self.graph
                .get(child)
                .is_some_and(|child| self.satisfies_rec(child, visited))
        })
    }

    fn validator_for(&self, node: &EntrySchema) -> Option<Arc<jsonschema::Validator>> {
        let mut validators = self.validators.lock().unwrap();
        validators
            .entry(node.type_id.clone())
            .or_insert_with(|| metadata_validator(node).map(Arc::new))
            .clone()
    }
}

struct Walker<'w> {
    dispatcher: &'w Dispatcher,
    query: &'w Query,
    pruner: Pruner<'w>,
    requires_schema: bool,
    options: Options,
}

impl<'w> Walker<'w> {
    fn visit<'v>(
        &'v self,
        ctx: &'v Context,
        entry: Arc<dyn plugin::Entry>,
        path: String,
        depth: usize,
    ) -> BoxFuture<'v, (Vec<Entry>, Option<Error>)>
    where
        'w: 'v,
    {
        let fut = async move {
            if ctx.cancel.is_cancelled() {
                return (Vec::new(), Some(Error::Cancelled));
            }

            let node = self.pruner.node(entry.base().type_id());
            if let Some(node) = node {
                if !self.pruner.subtree_satisfies(node) {
                    return (Vec::new(), None);
                }
            }

            let mut entries = Vec::new();
            let candidate = Entry::new(entry.as_ref(), path.clone());
            if depth >= self.options.min_depth
                && depth <= self.options.max_depth
                && !(self.requires_schema && node.is_none())
                && self.query.satisfied_by(&candidate, node)
            {
                entries.push(candidate);
            }

            if depth < self.options.max_depth && entry.capabilities().contains(Action::List) {
                match self.dispatcher.cached_list(ctx, &entry).await {
                    Err(Error::Cancelled) => return (entries, Some(Error::Cancelled)),
                    Err(err) => {
                        tracing::warn!(
                            path = entry.base().id().unwrap_or(path.as_str()),
                            error = %err,
                            "could not list entry; continuing the walk"
                        );
                    }
                    Ok(children) => {
                        let mut ordered: Vec<_> = children
                            .iter()
                            .map(|(cname, child)| {
                                (child.base().name().to_string(), cname.clone(), child.clone())
                            })
                            .collect();
                        ordered.sort_by(|a, b| a.0.cmp(&b.0));

                        let futs: Vec<_> = ordered
                            .into_iter()
                            .map(|(_, cname, child)| {
                                let child_path = if path.is_empty() {
                                    cname
                                } else {
                                    format!("{path}/{cname}")
                                };
                                self.visit(ctx, child, child_path, depth + 1)
                            })
                            .collect();
                        let mut subtrees =
                            futures::stream::iter(futs).buffered(self.options.concurrency.max(1));

                        while let Some((subtree, error)) = subtrees.next().await {
                            entries.extend(subtree);
                            if error.is_some() {
                                return (entries, error);
                            }
                        }
                    }
                }
            }

            (entries, None)
        };
        Box::pin(fut)
    }

}
