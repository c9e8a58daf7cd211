use plugin::{Action, EntryAttributes};
use serde::{Deserialize, Serialize};

/// The query engine's (and the API's) view of an entry: a snapshot of
/// everything a predicate can see. `path` is normalized by whoever
/// constructs the entry — the walker makes it relative to the start
/// entry, the list handler makes it absolute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub type_id: String,
    pub path: String,
    pub actions: Vec<String>,
    pub name: String,
    pub cname: String,
    pub attributes: EntryAttributes,
    pub metadata: serde_json::Value,
}

impl Entry {
    pub fn new(entry: &dyn plugin::Entry, path: impl Into<String>) -> Self {
        let base = entry.base();
        Self {
            type_id: base.type_id().to_string(),
            path: path.into(),
            actions: entry.capabilities().names(),
            name: base.name().to_string(),
            cname: base.cname(),
            attributes: base.attributes().clone(),
            metadata: serde_json::Value::Object(base.attributes().meta.clone()),
        }
    }

    pub fn supports(&self, action: Action) -> bool {
        self.actions.iter().any(|a| a == action.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use plugin::{ActionSet, EntryBase};

    #[derive(Debug)]
    struct Fixture(EntryBase);

    #[async_trait]
    impl plugin::Entry for Fixture {
        fn base(&self) -> &EntryBase {
            &self.0
        }

        fn capabilities(&self) -> ActionSet {
            [Action::List, Action::Metadata].into_iter().collect()
        }
    }

    #[test]
    fn snapshots_a_plugin_entry() {
        let mut meta = plugin::JsonObject::new();
        meta.insert("state".to_string(), serde_json::json!("running"));
        let base = EntryBase::new("web/1", "docker.Container")
            .with_attributes(EntryAttributes::new().with_meta(meta));
        base.set_id("/docker/containers/web#1".to_string());

        let entry = Entry::new(&Fixture(base), "containers/web#1");
        assert_eq!(entry.name, "web/1");
        assert_eq!(entry.cname, "web#1");
        assert_eq!(entry.path, "containers/web#1");
        assert_eq!(entry.actions, vec!["list", "metadata"]);
        assert_eq!(entry.metadata["state"], "running");
        assert!(entry.supports(Action::List));
        assert!(!entry.supports(Action::Exec));
    }
}
