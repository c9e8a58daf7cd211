use api::Client;
use rql::{Pruner, QueryExt};
use time::OffsetDateTime;

#[derive(Debug, clap::Args)]
pub struct FindArgs {
    /// `[path] [options] [expression]`, parsed find-style: options are
    /// -mindepth and -maxdepth; the expression composes primaries with
    /// -a/-o/!/parens.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

/// Walks the tree client-side, evaluating the expression against each
/// visited entry. Schemas fetched from the daemon prune subtrees that
/// cannot match; listing failures are reported and skipped.
pub async fn run(client: &Client, args: FindArgs) -> anyhow::Result<bool> {
    let parsed = match find::parse(&args.args, OffsetDateTime::now_utc()) {
        Ok(parsed) => parsed,
        Err(err) => {
            // A bad expression is an argument error, like any other
            // usage mistake.
            eprintln!("wash find: {err}");
            std::process::exit(2);
        }
    };
    let start_path = normalize(parsed.path.as_deref().unwrap_or("/"));

    let graph = client.schema("/").await?.unwrap_or_default();
    let pruner = Pruner::new(&graph, &parsed.query);
    let requires_schema = parsed.query.requires_schema();
    let min_depth = parsed.options.min_depth.unwrap_or(0);
    let max_depth = parsed.options.max_depth.unwrap_or(usize::MAX);

    let start = client.info(&start_path).await?;
    let mut ok = true;

    // Preorder traversal, siblings in name order. The stack holds
    // (entry, absolute path, depth), children pushed reversed.
    let mut stack = vec![(start, start_path.clone(), 0usize)];
    while let Some((entry, abs_path, depth)) = stack.pop() {
        let node = pruner.node(&entry.type_id);
        if let Some(node) = node {
            if !pruner.subtree_satisfies(node) {
                continue;
            }
        }

        if depth >= min_depth
            && depth <= max_depth
            && !(requires_schema && node.is_none())
            && parsed.query.satisfied_by(&entry, node)
        {
            println!("{abs_path}");
        }

        if depth < max_depth && entry.supports(plugin::Action::List) {
            match client.list(&abs_path).await {
                Ok(mut children) => {
                    children.sort_by(|a, b| b.name.cmp(&a.name));
                    for child in children {
                        let child_path = child.path.clone();
                        stack.push((child, child_path, depth + 1));
                    }
                }
                Err(err) => {
                    eprintln!("{abs_path}: {err}");
                    ok = false;
                }
            }
        }
    }
    Ok(ok)
}

fn normalize(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}
