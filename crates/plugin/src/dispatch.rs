use crate::action::Action;
use crate::attributes::JsonObject;
use crate::entry::{Entry, OpCode, Ttl};
use crate::error::{Error, Result};
use bytes::Bytes;
use datastore::{MemCache, Value};
use indexmap::IndexMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The children of a Parent, keyed by cname in insertion order.
pub type EntryMap = IndexMap<String, Arc<dyn Entry>>;

/// Default timeout applied to every plugin operation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-operation context: a cancellation token, plus the parent id the
/// dispatcher uses to derive an identity for entries that haven't been
/// assigned one yet.
#[derive(Clone, Default)]
pub struct Context {
    pub cancel: CancellationToken,
    parent_id: Option<String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            parent_id: None,
        }
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    fn child_of(&self, parent_id: &str) -> Self {
        Self {
            cancel: self.cancel.clone(),
            parent_id: Some(parent_id.to_string()),
        }
    }
}

lazy_static::lazy_static! {
    static ref OP_NAME_RE: regex::Regex = regex::Regex::new("^[A-Za-z]+$").unwrap();
}

/// The regex matching cache keys of `path` and all of its descendants.
/// The op-name prefix restricts deletion to real operation keys.
pub fn op_keys_regex(path: &str) -> regex::Regex {
    let expr = if path == "/" {
        "^[A-Za-z]+::/.*".to_string()
    } else {
        format!(
            "^[A-Za-z]+::/{}($|/.*)",
            regex::escape(path.trim_matches('/'))
        )
    };
    regex::Regex::new(&expr).expect("escaped path always compiles")
}

/// Dispatcher wraps entry operations with the cache: it resolves each
/// operation's TTL, propagates identity, and delegates to the store's
/// single-flight `get_or_update`. It is the only owner of the cache;
/// tests inject their own.
pub struct Dispatcher {
    cache: MemCache,
    timeout: Duration,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            cache: MemCache::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cache: MemCache::new(),
            timeout,
        }
    }

    /// Caches a Parent's List. Children get their ids assigned
    /// (`<parent_id>/<cname>`), inherit the parent's wrapped types
    /// unless they declare their own, and land in an insertion-ordered
    /// map keyed by cname. Duplicate cnames are a hard error.
    pub async fn cached_list(&self, ctx: &Context, entry: &Arc<dyn Entry>) -> Result<Arc<EntryMap>> {
        if !entry.capabilities().contains(Action::List) {
            return Err(entry.unsupported(Action::List));
        }
        let parent = entry.clone();
        let parent_id = self.entry_id(ctx, entry.as_ref());
        let child_ctx = ctx.child_of(&parent_id);
        let value = self
            .cached(ctx, OpCode::List.name(), entry, entry.base().ttl_of(OpCode::List), {
                let parent_id = parent_id.clone();
                move || async move {
                    let children = parent.list(&child_ctx).await?;
                    let map = assemble_children(&parent, &parent_id, children)?;
                    Ok(Arc::new(map) as Value)
                }
            })
            .await?;
        Ok(value.downcast::<EntryMap>().expect("List caches an EntryMap"))
    }

    /// Caches an entry's Open: its full content, size known.
    pub async fn cached_open(&self, ctx: &Context, entry: &Arc<dyn Entry>) -> Result<Bytes> {
        if !entry.capabilities().contains(Action::Open) {
            return Err(entry.unsupported(Action::Open));
        }
        let target = entry.clone();
        let op_ctx = ctx.clone();
        let value = self
            .cached(ctx, OpCode::Open.name(), entry, entry.base().ttl_of(OpCode::Open), {
                move || async move {
                    let content = target.open(&op_ctx).await?;
                    Ok(Arc::new(content) as Value)
                }
            })
            .await?;
        Ok(value
            .downcast::<Bytes>()
            .expect("Open caches Bytes")
            .as_ref()
            .clone())
    }

    /// Caches an entry's Metadata.
    pub async fn cached_metadata(
        &self,
        ctx: &Context,
        entry: &Arc<dyn Entry>,
    ) -> Result<Arc<JsonObject>> {
        if !entry.capabilities().contains(Action::Metadata) {
            return Err(entry.unsupported(Action::Metadata));
        }
        let target = entry.clone();
        let op_ctx = ctx.clone();
        let value = self
            .cached(
                ctx,
                OpCode::Metadata.name(),
                entry,
                entry.base().ttl_of(OpCode::Metadata),
                move || async move {
                    let metadata = target.metadata(&op_ctx).await?;
                    Ok(Arc::new(metadata) as Value)
                },
            )
            .await?;
        Ok(value.downcast::<JsonObject>().expect("Metadata caches a JsonObject"))
    }

    /// Caches a user-defined operation. Useful when an entry's Open and
    /// Metadata are both derived from one underlying API request.
    ///
    /// Panics if `op_name` isn't letters-only or collides with a
    /// framework op: both are programmer errors.
    pub async fn cached_op<F, Fut>(
        &self,
        ctx: &Context,
        op_name: &str,
        entry: &Arc<dyn Entry>,
        ttl: Ttl,
        load: F,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>> + Send,
    {
        assert!(
            OP_NAME_RE.is_match(op_name),
            "the op name {op_name} must match {}",
            OP_NAME_RE.as_str()
        );
        assert!(
            !OpCode::ALL.iter().any(|op| op.name() == op_name),
            "the op name {op_name} conflicts with cached_{}",
            op_name.to_lowercase()
        );
        self.cached(ctx, op_name, entry, ttl, load).await
    }

    /// Removes cached results for `path` and its descendants, returning
    /// the deleted keys.
    pub fn clear_path(&self, path: &str) -> Vec<String> {
        self.cache.delete(&op_keys_regex(path))
    }

    async fn cached<F, Fut>(
        &self,
        ctx: &Context,
        op_name: &str,
        entry: &Arc<dyn Entry>,
        ttl: Ttl,
        load: F,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>> + Send,
    {
        let id = self.entry_id(ctx, entry.as_ref());
        let guarded = {
            let cancel = ctx.cancel.clone();
            let timeout = self.timeout;
            move || async move {
                tokio::select! {
                    _ = cancel.cancelled() => Err(Error::Cancelled),
                    loaded = tokio::time::timeout(timeout, load()) => {
                        loaded.unwrap_or(Err(Error::Cancelled))
                    }
                }
            }
        };
        let ttl = match ttl {
            Ttl::Never => return guarded().await,
            Ttl::Default => Duration::ZERO,
            Ttl::For(duration) => duration,
        };
        let key = format!("{op_name}::{id}");
        self.cache
            .get_or_update(&key, ttl, move || async move {
                guarded().await.map_err(|err| Box::new(err) as datastore::LoadError)
            })
            .await
            .map_err(Error::from_cache)
    }

    /// The id used for cache keys. Falls back to deriving one from the
    /// context's parent id, assigning it to the entry along the way.
    fn entry_id(&self, ctx: &Context, entry: &dyn Entry) -> String {
        if let Some(id) = entry.base().id() {
            return id.to_string();
        }
        match ctx.parent_id() {
            Some(parent_id) => {
                let id = child_id(parent_id, &entry.base().cname());
                entry.base().set_id(id.clone());
                id
            }
            None => panic!(
                "cached op on {} had no entry id and the context did not include a parent id",
                entry.base().name()
            ),
        }
    }
}

fn child_id(parent_id: &str, cname: &str) -> String {
    format!("{}/{}", parent_id.trim_end_matches('/'), cname)
}

fn assemble_children(
    parent: &Arc<dyn Entry>,
    parent_id: &str,
    children: Vec<Arc<dyn Entry>>,
) -> Result<EntryMap> {
    let mut map = EntryMap::with_capacity(children.len());
    for child in children {
        let cname = child.base().cname();
        if let Some(duplicate) = map.get(&cname) {
            return Err(Error::DuplicateCName {
                parent_id: parent_id.to_string(),
                first_child_name: duplicate.base().name().to_string(),
                second_child_name: child.base().name().to_string(),
                cname,
            });
        }
        child.base().set_id(child_id(parent_id, &cname));
        if let Some(types) = parent.base().wrapped_types() {
            child.base().inherit_wrapped_types(types);
        }
        map.insert(cname, child);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionSet;
    use crate::entry::EntryBase;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct TestParent {
        base: EntryBase,
        children: Vec<&'static str>,
        lists: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl TestParent {
        fn new(name: &str, children: Vec<&'static str>) -> Arc<dyn Entry> {
            Self::with_delay(name, children, Duration::ZERO).0
        }

        fn with_delay(
            name: &str,
            children: Vec<&'static str>,
            delay: Duration,
        ) -> (Arc<dyn Entry>, Arc<AtomicUsize>) {
            let base = EntryBase::new(name, "test.Parent");
            base.set_id(format!("/{name}"));
            let lists = Arc::new(AtomicUsize::new(0));
            let parent = Arc::new(Self {
                base,
                children,
                lists: lists.clone(),
                delay,
            });
            (parent, lists)
        }
    }

    #[async_trait]
    impl Entry for TestParent {
        fn base(&self) -> &EntryBase {
            &self.base
        }

        fn capabilities(&self) -> ActionSet {
            [Action::List].into_iter().collect()
        }

        async fn list(&self, _ctx: &Context) -> Result<Vec<Arc<dyn Entry>>> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self
                .children
                .iter()
                .map(|name| {
                    Arc::new(TestFile {
                        base: EntryBase::new(*name, "test.File"),
                    }) as Arc<dyn Entry>
                })
                .collect())
        }
    }

    #[derive(Debug)]
    struct TestFile {
        base: EntryBase,
    }

    #[async_trait]
    impl Entry for TestFile {
        fn base(&self) -> &EntryBase {
            &self.base
        }

        fn capabilities(&self) -> ActionSet {
            [Action::Open, Action::Metadata].into_iter().collect()
        }

        async fn open(&self, _ctx: &Context) -> Result<Bytes> {
            Ok(Bytes::from_static(b"content"))
        }
    }

    #[tokio::test]
    async fn lists_children_with_assigned_ids() {
        let dispatcher = Dispatcher::new();
        let parent = TestParent::new("docker", vec!["containers", "volumes"]);

        let entries = dispatcher.cached_list(&Context::new(), &parent).await.unwrap();
        assert_eq!(
            entries.keys().collect::<Vec<_>>(),
            vec!["containers", "volumes"]
        );
        assert_eq!(
            entries.get("containers").unwrap().base().id(),
            Some("/docker/containers")
        );
        assert_eq!(
            entries.get("volumes").unwrap().base().id(),
            Some("/docker/volumes")
        );
    }

    #[tokio::test]
    async fn coalesces_concurrent_lists() {
        let dispatcher = Arc::new(Dispatcher::new());
        let (parent, lists) =
            TestParent::with_delay("docker", vec!["a", "b"], Duration::from_millis(20));

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let dispatcher = dispatcher.clone();
                let parent = parent.clone();
                tokio::spawn(async move {
                    dispatcher.cached_list(&Context::new(), &parent).await.unwrap()
                })
            })
            .collect();
        let mut maps = Vec::new();
        for task in tasks {
            maps.push(task.await.unwrap());
        }

        let listed = maps[0].keys().collect::<Vec<_>>();
        assert_eq!(listed, maps[1].keys().collect::<Vec<_>>());
        assert_eq!(
            maps[0].get("a").unwrap().base().id(),
            maps[1].get("a").unwrap().base().id(),
        );
        // Exactly one invocation across both callers.
        assert_eq!(lists.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_cnames_are_an_error() {
        let dispatcher = Dispatcher::new();
        // "foo/bar" and "foo#bar" collide once slashes are replaced.
        let parent = TestParent::new("plug", vec!["foo/bar", "foo#bar"]);

        let err = dispatcher
            .cached_list(&Context::new(), &parent)
            .await
            .unwrap_err();
        match err {
            Error::DuplicateCName {
                parent_id, cname, ..
            } => {
                assert_eq!(parent_id, "/plug");
                assert_eq!(cname, "foo#bar");
            }
            other => panic!("expected DuplicateCName, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn entries_without_ids_inherit_from_the_context() {
        let dispatcher = Dispatcher::new();
        let file: Arc<dyn Entry> = Arc::new(TestFile {
            base: EntryBase::new("log", "test.File"),
        });

        let ctx = Context::new().child_of("/docker/containers/web");
        let content = dispatcher.cached_open(&ctx, &file).await.unwrap();
        assert_eq!(content, Bytes::from_static(b"content"));
        assert_eq!(file.base().id(), Some("/docker/containers/web/log"));
    }

    #[tokio::test]
    #[should_panic(expected = "no entry id")]
    async fn missing_ids_without_a_parent_are_fatal() {
        let dispatcher = Dispatcher::new();
        let file: Arc<dyn Entry> = Arc::new(TestFile {
            base: EntryBase::new("log", "test.File"),
        });
        let _ = dispatcher.cached_open(&Context::new(), &file).await;
    }

    #[tokio::test]
    async fn unsupported_actions_fail_without_caching() {
        let dispatcher = Dispatcher::new();
        let parent = TestParent::new("docker", vec![]);
        let err = dispatcher
            .cached_open(&Context::new(), &parent)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedAction { .. }));
    }

    #[tokio::test]
    #[should_panic(expected = "conflicts with cached_list")]
    async fn user_ops_cannot_shadow_framework_ops() {
        let dispatcher = Dispatcher::new();
        let parent = TestParent::new("docker", vec![]);
        let _ = dispatcher
            .cached_op(&Context::new(), "List", &parent, Ttl::Default, || async {
                Ok(Arc::new(()) as Value)
            })
            .await;
    }

    #[tokio::test]
    #[should_panic(expected = "must match")]
    async fn user_op_names_are_letters_only() {
        let dispatcher = Dispatcher::new();
        let parent = TestParent::new("docker", vec![]);
        let _ = dispatcher
            .cached_op(&Context::new(), "Describe2", &parent, Ttl::Default, || async {
                Ok(Arc::new(()) as Value)
            })
            .await;
    }

    #[tokio::test]
    async fn never_ttls_bypass_the_cache() {
        let dispatcher = Dispatcher::new();
        let base = EntryBase::new("docker", "test.Parent").with_ttl(OpCode::List, Ttl::Never);
        base.set_id("/docker".to_string());
        let lists = Arc::new(AtomicUsize::new(0));
        let parent: Arc<dyn Entry> = Arc::new(TestParent {
            base,
            children: vec!["a"],
            lists: lists.clone(),
            delay: Duration::ZERO,
        });

        for _ in 0..2 {
            dispatcher.cached_list(&Context::new(), &parent).await.unwrap();
        }
        assert_eq!(lists.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancellation_aborts_in_flight_loads() {
        let dispatcher = Arc::new(Dispatcher::new());
        let (parent, _lists) =
            TestParent::with_delay("docker", vec!["a"], Duration::from_secs(60));

        let cancel = CancellationToken::new();
        let ctx = Context::with_cancel(cancel.clone());
        let pending = {
            let dispatcher = dispatcher.clone();
            let parent = parent.clone();
            tokio::spawn(async move { dispatcher.cached_list(&ctx, &parent).await })
        };
        tokio::task::yield_now().await;
        cancel.cancel();
        assert_eq!(pending.await.unwrap().unwrap_err(), Error::Cancelled);
    }

    #[test]
    fn op_keys_regexes_match_paths_and_descendants() {
        let rx = op_keys_regex("/docker/containers");
        assert!(rx.is_match("List::/docker/containers"));
        assert!(rx.is_match("Metadata::/docker/containers/web"));
        assert!(!rx.is_match("List::/docker"));
        assert!(!rx.is_match("List::/docker/containersplus"));

        let rx = op_keys_regex("/");
        assert!(rx.is_match("List::/docker"));
        assert!(!rx.is_match("garbage"));
    }

    #[tokio::test]
    async fn clear_path_deletes_cached_results() {
        let dispatcher = Dispatcher::new();
        let parent = TestParent::new("docker", vec!["a"]);
        dispatcher.cached_list(&Context::new(), &parent).await.unwrap();

        let deleted = dispatcher.clear_path("/docker");
        assert_eq!(deleted, vec!["List::/docker"]);
        assert!(dispatcher.clear_path("/docker").is_empty());
    }
}
