//! Subcommand implementations.

use crate::console::Output;
use anyhow::{anyhow, bail, Context, Result};
use cragsync_core::{ContentNode, DownloadOptions, NodeRef, Pin, SyncEngine};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;
use tracing::{info, warn};

fn resolve(engine: &SyncEngine, pin: &str) -> Result<NodeRef> {
    let pin: Pin = pin.parse().with_context(|| format!("invalid pin '{}'", pin))?;
    engine
        .find(&pin)
        .ok_or_else(|| anyhow!("{} is not in the local tree, run `cragsync tree --refresh`", pin))
}

pub async fn tree(engine: &SyncEngine, out: &Output, refresh: bool, depth: Option<usize>) -> Result<()> {
    if refresh || engine.repository().is_empty() {
        let count = engine.refresh().await?;
        info!("Fetched manifest with {} nodes", count);
    }

    let mut lines = Vec::new();
    for area in engine.roots() {
        print_node(engine, &area, 0, depth.unwrap_or(usize::MAX), &mut lines).await?;
    }
    if out.is_json() {
        println!("{}", serde_json::Value::Array(lines));
    } else {
        for line in lines {
            println!("{}", line["line"].as_str().unwrap_or_default());
        }
    }
    Ok(())
}

fn print_node<'a>(
    engine: &'a SyncEngine,
    node: &'a ContentNode,
    level: usize,
    max_depth: usize,
    lines: &'a mut Vec<serde_json::Value>,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let status = engine.status(node).await?;
        lines.push(json!({
            "pin": node.pin().to_string(),
            "name": node.display_name(),
            "status": status.to_string(),
            "line": format!("{}{} {} [{}]", "  ".repeat(level), node.pin(), node.display_name(), status),
        }));
        if level >= max_depth || node.namespace().child().is_none() {
            return Ok(());
        }
        let children = engine.children(node).await?;
        for child in children.iter() {
            print_node(engine, child, level + 1, max_depth, lines).await?;
        }
        Ok(())
    }
    .boxed()
}

pub async fn status(engine: &SyncEngine, out: &Output, pin: &str) -> Result<()> {
    let node = resolve(engine, pin)?;
    let status = engine.status(&node).await?;
    let size = engine.size(&node).await.ok();
    let date = engine.download_date(&node).ok();
    let nodes = engine.full_count(node.pin());

    let mut text = format!("{} ({}): {}", node.pin(), node.display_name(), status);
    if let Some(size) = size {
        text.push_str(&format!(", {} bytes", size));
    }
    if let Some(date) = date {
        text.push_str(&format!(", downloaded {}", date.to_rfc3339()));
    }
    out.emit(
        text,
        json!({
            "pin": node.pin().to_string(),
            "status": status.to_string(),
            "bytes": size,
            "downloaded_at": date,
            "nodes": nodes,
        }),
    );
    Ok(())
}

pub async fn download(engine: &SyncEngine, out: &Output, pin: &str, options: DownloadOptions) -> Result<()> {
    let node = resolve(engine, pin)?;
    let job = engine.download(&node, options)?;
    info!("Downloading {} ({} nodes)", node.pin(), engine.full_count(node.pin()));

    let outcome = tokio::select! {
        outcome = job.wait() => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling download");
            job.cancel();
            job.wait().await
        }
    };
    eprintln!();

    let failed: Vec<_> = outcome
        .nodes
        .iter()
        .filter_map(|n| n.result.err().map(|kind| (n.pin.to_string(), kind)))
        .collect();
    out.emit(
        format!(
            "{}: {:?}, {} bytes, {} nodes, {} failed",
            node.pin(),
            outcome.state(),
            outcome.bytes_done,
            outcome.nodes.len(),
            failed.len()
        ),
        serde_json::to_value(outcome.as_ref())?,
    );
    if !out.is_json() {
        for (pin, kind) in &failed {
            println!("  {} {}", pin, kind);
        }
    }
    match outcome.result {
        Ok(()) => Ok(()),
        Err(kind) => bail!("download of {} failed: {}", node.pin(), kind),
    }
}

pub async fn delete(engine: &SyncEngine, out: &Output, pin: &str) -> Result<()> {
    let node = resolve(engine, pin)?;
    engine.delete(&node).await?;
    out.emit(
        format!("Deleted {}", node.pin()),
        json!({ "pin": node.pin().to_string(), "deleted": true }),
    );
    Ok(())
}

pub async fn reconcile(engine: &SyncEngine, out: &Output) -> Result<()> {
    let updated = engine.reconcile().await?;
    eprintln!();
    out.emit(format!("Updated {} assets", updated), json!({ "updated": updated }));
    Ok(())
}

pub async fn jobs(engine: &SyncEngine, out: &Output, resume: bool) -> Result<()> {
    let interrupted = engine.interrupted_jobs();
    if !resume {
        if out.is_json() {
            println!("{}", serde_json::to_value(&interrupted)?);
        } else if interrupted.is_empty() {
            println!("No interrupted downloads");
        } else {
            for entry in &interrupted {
                println!("{} {:?} since {}", entry.pin, entry.state, entry.updated_at.to_rfc3339());
            }
        }
        return Ok(());
    }

    let mut failures = 0;
    for (pin, handle) in engine.resume_interrupted() {
        let outcome = match handle {
            Ok(handle) => handle.wait().await,
            Err(e) => {
                warn!("Cannot resume {}: {}", pin, e);
                failures += 1;
                continue;
            }
        };
        if outcome.result.is_err() {
            failures += 1;
        }
        out.emit(
            format!("{}: {:?}", pin, outcome.state()),
            serde_json::to_value(outcome.as_ref())?,
        );
    }
    if failures > 0 {
        bail!("{} resumed downloads failed", failures);
    }
    Ok(())
}
