//! CLI command execution.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use procgroup::{ChannelReceiver, ChildProcess, Group, GroupOptions, Manifest, OutputLine, ProcessHandle};

use super::args::{Cli, Commands};

/// How long to keep printing output after the group is done.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Execute the parsed CLI command.
pub async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            manifest,
            partition,
            delay_ms,
            timeout_ms,
            check,
        } => {
            let overrides = Overrides {
                partition,
                delay: delay_ms.map(Duration::from_millis),
                timeout: timeout_ms.map(Duration::from_millis),
            };
            cmd_run(&manifest, &overrides, check).await
        }
        Commands::Ready { manifest, timeout_ms } => {
            cmd_ready(&manifest, timeout_ms.map(Duration::from_millis)).await
        }
        Commands::Validate { manifest } => cmd_validate(&manifest),
    }
}

/// CLI flags that take precedence over manifest values.
#[derive(Debug, Default)]
struct Overrides {
    partition: Option<usize>,
    delay: Option<Duration>,
    timeout: Option<Duration>,
}

fn load(path: &Path) -> Result<Manifest> {
    Manifest::load(path).with_context(|| format!("Failed to load manifest {}", path.display()))
}

/// Build a group from a manifest, with output printed as it arrives.
async fn build_group(manifest: &Manifest, partition: usize) -> Result<(Group, JoinHandle<()>)> {
    let options = manifest.process_options().context("Invalid manifest")?;

    let (receiver, rx) = ChannelReceiver::shared();
    let printer = tokio::spawn(print_output(rx));

    let mut group = Group::new(GroupOptions::new(receiver).partition(partition));
    group
        .add(
            options
                .into_iter()
                .map(|o| Arc::new(ChildProcess::new(o)) as ProcessHandle),
        )
        .await;

    Ok((group, printer))
}

async fn print_output(mut rx: mpsc::UnboundedReceiver<OutputLine>) {
    while let Some(line) = rx.recv().await {
        println!("{line}");
    }
}

/// Drop the group so the output channel closes, then let the printer catch up.
async fn finish(group: Group, printer: JoinHandle<()>) {
    drop(group);
    if tokio::time::timeout(FLUSH_TIMEOUT, printer).await.is_err() {
        tracing::debug!("output still open, not waiting for it");
    }
}

async fn cmd_run(path: &Path, overrides: &Overrides, check: bool) -> Result<()> {
    let manifest = load(path)?;
    let partition = overrides.partition.unwrap_or(manifest.partition);
    let delay = overrides.delay.or_else(|| manifest.delay());
    let timeout = overrides.timeout.or_else(|| manifest.timeout());

    let (group, printer) = build_group(&manifest, partition).await?;
    let count = group.len();
    tracing::info!(processes = count, partition, check, "running group");

    let result = if check {
        group.run_checked(delay, timeout).await
    } else {
        group.run(delay, timeout).await
    };
    finish(group, printer).await;

    result.context("Group run failed")?;
    eprintln!("Completed {count} process(es)");
    Ok(())
}

async fn cmd_ready(path: &Path, timeout: Option<Duration>) -> Result<()> {
    let manifest = load(path)?;
    let (group, printer) = build_group(&manifest, manifest.partition).await?;

    group.start(manifest.delay()).await;
    let result = group.wait_available(timeout).await;
    group.stop().await;
    let count = group.len();
    finish(group, printer).await;

    result.context("Group did not become available")?;
    eprintln!("All {count} process(es) available");
    Ok(())
}

fn cmd_validate(path: &Path) -> Result<()> {
    let manifest = load(path)?;
    let options = manifest.process_options().context("Invalid manifest")?;

    println!(
        "{} process(es), {}",
        options.len(),
        if manifest.partition == 0 {
            "sequential".to_string()
        } else {
            format!("partition {}", manifest.partition)
        }
    );
    for o in &options {
        println!(
            "  {:<20} {} {}",
            o.name.as_deref().unwrap_or(&o.program),
            o.program,
            o.args.join(" ")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn manifest_file(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_run_manifest() {
        let file = manifest_file(
            r#"{ "partition": 2, "processes": [
                { "program": "echo", "args": ["one"] },
                { "program": "echo", "args": ["two"] },
                { "program": "true" }
            ] }"#,
        );
        cmd_run(file.path(), &Overrides::default(), true).await.unwrap();
    }

    #[tokio::test]
    async fn test_run_checked_failure() {
        let file = manifest_file(r#"{ "processes": [ { "program": "sh", "args": ["-c", "exit 3"] } ] }"#);

        // Lenient run succeeds, checked run reports the exit.
        cmd_run(file.path(), &Overrides::default(), false).await.unwrap();
        assert!(cmd_run(file.path(), &Overrides::default(), true).await.is_err());
    }

    #[tokio::test]
    async fn test_run_timeout_override() {
        let file = manifest_file(r#"{ "processes": [ { "program": "sleep", "args": ["10"] } ] }"#);
        let overrides = Overrides {
            timeout: Some(Duration::from_millis(100)),
            ..Overrides::default()
        };
        let err = cmd_run(file.path(), &overrides, false).await.unwrap_err();
        assert!(format!("{err:#}").contains("timed out"));
    }

    #[tokio::test]
    async fn test_ready() {
        let file = manifest_file(
            r#"{ "processes": [
                { "program": "sh", "args": ["-c", "echo ready; sleep 10"], "ready_pattern": "^ready$" }
            ] }"#,
        );
        cmd_ready(file.path(), Some(Duration::from_secs(5))).await.unwrap();
    }

    #[test]
    fn test_validate() {
        let file = manifest_file(r#"{ "processes": [ { "name": "a", "program": "true" } ] }"#);
        cmd_validate(file.path()).unwrap();

        let file = manifest_file(r#"{ "processes": [ { "program": "" } ] }"#);
        assert!(cmd_validate(file.path()).is_err());
    }
}
