use api::Client;
use comfy_table::{presets, Table};
use time::format_description::well_known::Rfc3339;

#[derive(Debug, clap::Args)]
pub struct ListArgs {
    /// Path to list.
    #[arg(default_value = "/")]
    pub path: String,
}

#[derive(Debug, clap::Args)]
pub struct InfoArgs {
    #[arg(required = true)]
    pub paths: Vec<String>,
}

#[derive(Debug, clap::Args)]
pub struct MetaArgs {
    #[arg(required = true)]
    pub paths: Vec<String>,
}

#[derive(Debug, clap::Args)]
pub struct RmArgs {
    /// Delete parent entries and everything beneath them.
    #[arg(short = 'r')]
    pub recurse: bool,
    /// Ignore missing entries.
    #[arg(short = 'f')]
    pub force: bool,
    #[arg(required = true)]
    pub paths: Vec<String>,
}

#[derive(Debug, clap::Args)]
pub struct StreeArgs {
    /// Path whose schema to render.
    #[arg(default_value = "/")]
    pub path: String,
}

/// Exit code semantics shared by the per-path subcommands: 0 when
/// everything succeeded, 1 when any path failed.
pub type CommandResult = anyhow::Result<bool>;

pub async fn list(client: &Client, args: ListArgs) -> CommandResult {
    let entries = match client.list(&args.path).await {
        Ok(entries) => entries,
        Err(err) => {
            eprintln!("{}: {err}", args.path);
            return Ok(false);
        }
    };

    let mut table = Table::new();
    table.load_preset(presets::NOTHING);
    table.set_header(["NAME", "MODIFIED", "ACTIONS"]);
    for entry in entries {
        let modified = entry
            .attributes
            .mtime
            .and_then(|mtime| mtime.format(&Rfc3339).ok())
            .unwrap_or_else(|| "<unknown>".to_string());
        table.add_row([entry.cname, modified, entry.actions.join(", ")]);
    }
    println!("{table}");
    Ok(true)
}

pub async fn info(client: &Client, args: InfoArgs) -> CommandResult {
    let mut ok = true;
    for path in &args.paths {
        match client.info(path).await {
            Ok(entry) => {
                let rendered =
                    serde_yaml::to_string(&entry).unwrap_or_else(|err| format!("error: {err}"));
                println!("{path}:\n{rendered}");
            }
            Err(err) => {
                eprintln!("{path}: {err}");
                ok = false;
            }
        }
    }
    Ok(ok)
}

pub async fn meta(client: &Client, args: MetaArgs) -> CommandResult {
    let mut ok = true;
    for path in &args.paths {
        match client.metadata(path).await {
            Ok(metadata) => {
                let rendered = serde_yaml::to_string(&metadata)
                    .unwrap_or_else(|err| format!("error: {err}"));
                print!("{rendered}");
            }
            Err(err) => {
                eprintln!("{path}: {err}");
                ok = false;
            }
        }
    }
    Ok(ok)
}

pub async fn rm(client: &Client, args: RmArgs) -> CommandResult {
    let mut ok = true;
    for path in &args.paths {
        match client.delete(path, args.recurse).await {
            Ok(()) => {}
            Err(plugin::Error::NotFound { .. }) if args.force => {}
            Err(err) => {
                eprintln!("{path}: {err}");
                ok = false;
            }
        }
    }
    Ok(ok)
}

pub async fn stree(client: &Client, args: StreeArgs) -> CommandResult {
    let graph = match client.schema(&args.path).await {
        Ok(Some(graph)) => graph,
        Ok(None) => {
            eprintln!("{}: the plugin does not document a schema", args.path);
            return Ok(false);
        }
        Err(err) => {
            eprintln!("{}: {err}", args.path);
            return Ok(false);
        }
    };
    let Some(root) = graph.root() else {
        eprintln!("{}: the schema graph is empty", args.path);
        return Ok(false);
    };
    println!("{}", render_label(root));
    let mut stack = vec![root.type_id.clone()];
    render_children(&graph, root, "", &mut stack);
    Ok(true)
}

fn render_label(node: &plugin::EntrySchema) -> String {
    // Non-singletons render bracketed: many instances of this thing.
    if node.singleton {
        node.label.clone()
    } else {
        format!("[{}]", node.label)
    }
}

fn render_children(
    graph: &plugin::SchemaGraph,
    node: &plugin::EntrySchema,
    prefix: &str,
    stack: &mut Vec<String>,
) {
    let children: Vec<_> = node
        .children
        .iter()
        .filter_map(|type_id| graph.get(type_id))
        .collect();
    for (i, child) in children.iter().enumerate() {
        let last = i + 1 == children.len();
        let branch = if last { "└── " } else { "├── " };
        println!("{prefix}{branch}{}", render_label(child));
        if stack.iter().any(|id| *id == child.type_id) {
            // A cycle (e.g. a directory containing directories);
            // one level is enough to show the shape.
            continue;
        }
        stack.push(child.type_id.clone());
        let deeper = format!("{prefix}{}", if last { "    " } else { "│   " });
        render_children(graph, child, &deeper, stack);
        stack.pop();
    }
}
