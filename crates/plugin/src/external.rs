use crate::action::{Action, ActionSet};
use crate::attributes::{EntryAttributes, JsonObject};
use crate::dispatch::Context;
use crate::entry::{ByteStream, Entry, EntryBase, ExecResult, OpCode, SignalSchema, Ttl};
use crate::error::{Error, Result};
use crate::schema::{EntrySchema, SchemaGraph};
use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

/// External plugins get about five seconds to finish initializing.
pub const INIT_TIMEOUT: Duration = Duration::from_secs(5);

/// A plugin script. Operations are invoked as
/// `<script> <method> <entry-state-json> [args...]`; the script prints
/// one JSON document on stdout and reflects success in its exit status.
#[derive(Debug)]
pub struct PluginScript {
    path: PathBuf,
}

impl PluginScript {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn invoke(&self, ctx: &Context, method: &str, args: &[&str]) -> Result<Vec<u8>> {
        let mut command = tokio::process::Command::new(&self.path);
        command
            .arg(method)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        tracing::debug!(script = %self.path.display(), method, "invoking external plugin");

        let child = command.spawn().map_err(|err| {
            Error::PluginError(format!(
                "could not invoke {}: {}",
                self.path.display(),
                err
            ))
        })?;
        let output = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
            output = child.wait_with_output() => output.map_err(|err| {
                Error::PluginError(format!("{} {}: {}", self.path.display(), method, err))
            })?,
        };
        if !output.status.success() {
            return Err(Error::PluginError(format!(
                "{} {} exited with {}: {}",
                self.path.display(),
                method,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim(),
            )));
        }
        Ok(output.stdout)
    }
}

/// A method reported by an external plugin: either a name, or a
/// `[name, value]` tuple whose value is the method's prefetched result
/// (e.g. a pre-computed schema graph keyed by type id).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DecodedMethod {
    Name(String),
    Tuple(String, serde_json::Value),
}

impl DecodedMethod {
    fn name(&self) -> &str {
        match self {
            DecodedMethod::Name(name) => name,
            DecodedMethod::Tuple(name, _) => name,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct DecodedCacheTtls {
    #[serde(default)]
    pub list: Option<i64>,
    #[serde(default)]
    pub read: Option<i64>,
    #[serde(default)]
    pub metadata: Option<i64>,
}

fn to_ttl(seconds: Option<i64>) -> Ttl {
    match seconds {
        None | Some(0) => Ttl::Default,
        Some(s) if s < 0 => Ttl::Never,
        Some(s) => Ttl::For(Duration::from_secs(s as u64)),
    }
}

/// The wire form of an external plugin entry, decoded from a script's
/// stdout.
#[derive(Debug, Clone, Deserialize)]
pub struct DecodedEntry {
    pub name: String,
    #[serde(default)]
    pub methods: Vec<DecodedMethod>,
    #[serde(default)]
    pub state: Option<serde_json::Value>,
    #[serde(default)]
    pub cache_ttls: DecodedCacheTtls,
    #[serde(default)]
    pub slash_replacer: Option<String>,
    #[serde(default)]
    pub attributes: Option<EntryAttributes>,
    #[serde(default)]
    pub type_id: Option<String>,
    #[serde(default)]
    pub signals: Vec<SignalSchema>,
}

/// An entry backed by an external plugin script.
pub struct ExternalEntry {
    base: EntryBase,
    script: Arc<PluginScript>,
    state: serde_json::Value,
    methods: ActionSet,
    signals: Vec<SignalSchema>,
    prefetched: HashMap<&'static str, serde_json::Value>,
}

impl ExternalEntry {
    pub fn from_decoded(decoded: DecodedEntry, script: Arc<PluginScript>) -> Result<Self> {
        if decoded.name.is_empty() {
            return Err(Error::SyntaxError(
                "external plugin entries must have a name".to_string(),
            ));
        }
        let slash_replacer = match decoded.slash_replacer.as_deref() {
            None => None,
            Some(replacer) => {
                let mut chars = replacer.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Some(c),
                    _ => {
                        return Err(Error::SyntaxError(format!(
                            "entry {}: slash_replacer must be a single character, got {replacer:?}",
                            decoded.name
                        )))
                    }
                }
            }
        };

        let mut methods = ActionSet::default();
        let mut prefetched = HashMap::new();
        for method in &decoded.methods {
            let action = match method.name() {
                // An external "read" serves both the Open and Read actions.
                "read" => {
                    methods.insert(Action::Open);
                    Action::Read
                }
                other => match Action::from_name(other) {
                    Some(action) => action,
                    None => {
                        tracing::warn!(
                            entry = decoded.name,
                            method = other,
                            "ignoring unknown external plugin method"
                        );
                        continue;
                    }
                },
            };
            methods.insert(action);
            if let DecodedMethod::Tuple(name, value) = method {
                for known in ["list", "read", "metadata", "schema"] {
                    if name == known {
                        prefetched.insert(known, value.clone());
                    }
                }
            }
        }

        for signal in &decoded.signals {
            signal.validate()?;
        }

        let mut base = EntryBase::new(
            decoded.name.clone(),
            decoded.type_id.clone().unwrap_or_default(),
        )
        .with_attributes(decoded.attributes.clone().unwrap_or_default())
        .with_ttl(OpCode::List, to_ttl(decoded.cache_ttls.list))
        .with_ttl(OpCode::Open, to_ttl(decoded.cache_ttls.read))
        .with_ttl(OpCode::Metadata, to_ttl(decoded.cache_ttls.metadata));
        if let Some(replacer) = slash_replacer {
            base = base.with_slash_replacer(replacer);
        }

        Ok(Self {
            base,
            script,
            state: decoded.state.unwrap_or(serde_json::Value::Null),
            methods,
            signals: decoded.signals,
            prefetched,
        })
    }

    fn state_arg(&self) -> String {
        self.state.to_string()
    }

    /// The schema graph embedded in a root's `["schema", {...}]`
    /// method tuple, partitioned from this entry's type id.
    pub fn reported_schema_graph(&self) -> Result<Option<SchemaGraph>> {
        let Some(value) = self.prefetched.get("schema") else {
            return Ok(None);
        };
        let nodes: IndexMap<String, EntrySchema> = serde_json::from_value(value.clone())
            .map_err(|err| {
                Error::SyntaxError(format!(
                    "{}: could not decode the schema graph: {err}",
                    self.base.name()
                ))
            })?;
        let root_type_id = self.base.type_id();
        if root_type_id.is_empty() {
            return Err(Error::SyntaxError(format!(
                "{}: entries with a schema graph must report a type_id",
                self.base.name()
            )));
        }
        SchemaGraph::from_external(&nodes, root_type_id).map(Some)
    }

    fn decode_children(&self, raw: &[u8]) -> Result<Vec<Arc<dyn Entry>>> {
        let decoded: Vec<DecodedEntry> = serde_json::from_slice(raw).map_err(|err| {
            Error::PluginError(format!(
                "{}: could not decode list output: {err}",
                self.base.name()
            ))
        })?;
        decoded
            .into_iter()
            .map(|child| {
                ExternalEntry::from_decoded(child, self.script.clone())
                    .map(|entry| Arc::new(entry) as Arc<dyn Entry>)
            })
            .collect()
    }
}

#[async_trait]
impl Entry for ExternalEntry {
    fn base(&self) -> &EntryBase {
        &self.base
    }

    fn capabilities(&self) -> ActionSet {
        self.methods
    }

    fn signals(&self) -> Vec<SignalSchema> {
        self.signals.clone()
    }

    async fn list(&self, ctx: &Context) -> Result<Vec<Arc<dyn Entry>>> {
        if let Some(value) = self.prefetched.get("list") {
            let raw = serde_json::to_vec(value).expect("prefetched values re-serialize");
            return self.decode_children(&raw);
        }
        let raw = self.script.invoke(ctx, "list", &[&self.state_arg()]).await?;
        self.decode_children(&raw)
    }

    async fn open(&self, ctx: &Context) -> Result<Bytes> {
        self.read(ctx).await
    }

    async fn read(&self, ctx: &Context) -> Result<Bytes> {
        if let Some(value) = self.prefetched.get("read") {
            if let serde_json::Value::String(content) = value {
                return Ok(Bytes::from(content.clone().into_bytes()));
            }
        }
        let raw = self.script.invoke(ctx, "read", &[&self.state_arg()]).await?;
        Ok(Bytes::from(raw))
    }

    async fn stream(&self, ctx: &Context) -> Result<ByteStream> {
        let raw = self
            .script
            .invoke(ctx, "stream", &[&self.state_arg()])
            .await?;
        Ok(Box::new(std::io::Cursor::new(raw)))
    }

    async fn exec(&self, ctx: &Context, cmd: &str, args: &[String]) -> Result<ExecResult> {
        let mut invoke_args = vec![self.state_arg(), cmd.to_string()];
        invoke_args.extend(args.iter().cloned());
        let arg_refs: Vec<&str> = invoke_args.iter().map(String::as_str).collect();
        let raw = self.script.invoke(ctx, "exec", &arg_refs).await?;
        Ok(ExecResult {
            exit_code: 0,
            stdout: Bytes::from(raw),
            stderr: Bytes::new(),
        })
    }

    async fn delete(&self, ctx: &Context) -> Result<bool> {
        let raw = self
            .script
            .invoke(ctx, "delete", &[&self.state_arg()])
            .await?;
        serde_json::from_slice(&raw).map_err(|err| {
            Error::PluginError(format!(
                "{}: delete must print a JSON boolean: {err}",
                self.base.name()
            ))
        })
    }

    async fn signal(&self, ctx: &Context, signal: &str) -> Result<()> {
        self.script
            .invoke(ctx, "signal", &[&self.state_arg(), signal])
            .await?;
        Ok(())
    }

    async fn metadata(&self, ctx: &Context) -> Result<JsonObject> {
        let value = match self.prefetched.get("metadata") {
            Some(value) => value.clone(),
            None => {
                let raw = self
                    .script
                    .invoke(ctx, "metadata", &[&self.state_arg()])
                    .await?;
                serde_json::from_slice(&raw).map_err(|err| {
                    Error::PluginError(format!(
                        "{}: could not decode metadata output: {err}",
                        self.base.name()
                    ))
                })?
            }
        };
        match value {
            serde_json::Value::Object(object) => Ok(object),
            other => Err(Error::PluginError(format!(
                "{}: metadata must be a JSON object, got {other}",
                self.base.name()
            ))),
        }
    }
}

/// Starts an external plugin: invokes `init <config-json>`, decodes the
/// root entry, and partitions its schema graph if one was reported.
/// The root must support list.
pub async fn init_external_plugin(
    script_path: impl Into<PathBuf>,
    name: &str,
    config: &serde_json::Value,
) -> Result<(Arc<dyn Entry>, Option<SchemaGraph>)> {
    let script = Arc::new(PluginScript::new(script_path));
    let config_arg = config.to_string();

    let ctx = Context::new();
    let raw = tokio::time::timeout(INIT_TIMEOUT, script.invoke(&ctx, "init", &[&config_arg]))
        .await
        .map_err(|_| {
            Error::PluginError(format!(
                "{}: timed out while waiting for init to finish",
                script.path().display()
            ))
        })??;

    let mut decoded: DecodedEntry = serde_json::from_slice(&raw).map_err(|err| {
        Error::SyntaxError(format!(
            "{}: could not decode the plugin root: {err}",
            script.path().display()
        ))
    })?;
    if decoded.name.is_empty() {
        decoded.name = name.to_string();
    } else if decoded.name != name {
        return Err(Error::SyntaxError(format!(
            "plugin root's name {} must match the plugin name {name}; \
             it's safe to omit name from the response to 'init'",
            decoded.name
        )));
    }
    if decoded.methods.is_empty() {
        decoded.methods = vec![DecodedMethod::Name("list".to_string())];
    }

    let root = ExternalEntry::from_decoded(decoded, script.clone())?;
    if !root.capabilities().contains(Action::List) {
        return Err(Error::SyntaxError(format!(
            "plugin root for {} must implement 'list'",
            script.path().display()
        )));
    }
    let graph = root.reported_schema_graph()?;
    Ok((Arc::new(root), graph))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(raw: serde_json::Value) -> DecodedEntry {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn decodes_methods_as_names_or_tuples() {
        let decoded = decode(serde_json::json!({
            "name": "db",
            "methods": ["list", ["metadata", {"provisioned": true}], "delete"],
        }));
        let entry =
            ExternalEntry::from_decoded(decoded, Arc::new(PluginScript::new("/bin/true"))).unwrap();
        assert!(entry.capabilities().contains(Action::List));
        assert!(entry.capabilities().contains(Action::Metadata));
        assert!(entry.capabilities().contains(Action::Delete));
        assert!(!entry.capabilities().contains(Action::Exec));
        assert!(entry.prefetched.contains_key("metadata"));
    }

    #[test]
    fn read_implies_open() {
        let decoded = decode(serde_json::json!({"name": "log", "methods": ["read"]}));
        let entry =
            ExternalEntry::from_decoded(decoded, Arc::new(PluginScript::new("/bin/true"))).unwrap();
        assert!(entry.capabilities().contains(Action::Read));
        assert!(entry.capabilities().contains(Action::Open));
    }

    #[test]
    fn multi_character_slash_replacers_are_rejected() {
        let decoded = decode(serde_json::json!({
            "name": "bad",
            "methods": ["list"],
            "slash_replacer": "::",
        }));
        let err = ExternalEntry::from_decoded(decoded, Arc::new(PluginScript::new("/bin/true")))
            .unwrap_err();
        assert!(matches!(err, Error::SyntaxError(_)), "got {err:?}");
    }

    #[test]
    fn cache_ttls_map_onto_ops() {
        let decoded = decode(serde_json::json!({
            "name": "db",
            "methods": ["list", "read"],
            "cache_ttls": {"list": 30, "read": -1},
        }));
        let entry =
            ExternalEntry::from_decoded(decoded, Arc::new(PluginScript::new("/bin/true"))).unwrap();
        assert_eq!(
            entry.base().ttl_of(OpCode::List),
            Ttl::For(Duration::from_secs(30))
        );
        assert_eq!(entry.base().ttl_of(OpCode::Open), Ttl::Never);
        assert_eq!(entry.base().ttl_of(OpCode::Metadata), Ttl::Default);
    }

    #[cfg(unix)]
    mod scripted {
        use super::*;
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        fn write_script(contents: &str) -> tempfile::NamedTempFile {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(file, "#!/bin/sh\n{contents}").unwrap();
            let mut permissions = file.as_file().metadata().unwrap().permissions();
            permissions.set_mode(0o755);
            file.as_file().set_permissions(permissions).unwrap();
            file
        }

        #[tokio::test]
        async fn initializes_and_lists_a_plugin() {
            let script = write_script(
                r#"
case "$1" in
  init) echo '{"name": "", "methods": ["list"]}' ;;
  list) echo '[{"name": "one", "methods": ["read"], "state": {"n": 1}}]' ;;
  read) printf "hello" ;;
esac
"#,
            );

            let (root, graph) =
                init_external_plugin(script.path(), "testplug", &serde_json::json!({}))
                    .await
                    .unwrap();
            assert!(graph.is_none());
            assert_eq!(root.base().name(), "testplug");

            let children = root.list(&Context::new()).await.unwrap();
            assert_eq!(children.len(), 1);
            assert_eq!(children[0].base().name(), "one");

            let content = children[0].read(&Context::new()).await.unwrap();
            assert_eq!(content, Bytes::from_static(b"hello"));
        }

        #[tokio::test]
        async fn failed_invocations_surface_stderr() {
            let script = write_script(r#"echo "it broke" >&2; exit 3"#);
            let entry = ExternalEntry::from_decoded(
                decode(serde_json::json!({"name": "x", "methods": ["metadata"]})),
                Arc::new(PluginScript::new(script.path())),
            )
            .unwrap();

            let err = entry.metadata(&Context::new()).await.unwrap_err();
            match err {
                Error::PluginError(message) => assert!(message.contains("it broke")),
                other => panic!("expected PluginError, got {other:?}"),
            }
        }
    }
}
