//! Flash read-back command implementation.

use {
    super::flash::ProgressObserver,
    crate::{Cli, config::Config, open_session, serial::PromptSelector, session_config, target_port},
    anyhow::{Context, Result},
    console::style,
    std::{fs, path::Path},
};

/// Read command implementation.
pub(crate) fn cmd_read(
    cli: &Cli,
    config: &mut Config,
    file: &Path,
    offset: u32,
    length: u32,
) -> Result<()> {
    let port = target_port(cli, config);
    let mut session = open_session(session_config(cli, config));
    let mut selector = PromptSelector::new(cli.non_interactive, config);

    if !cli.quiet {
        eprintln!(
            "{} Reading {length} bytes at {offset:#010x}",
            style("📖").cyan()
        );
    }

    let mut observer = ProgressObserver::new(cli.quiet);
    let result = session.read_flash(port.as_deref(), offset, length, &mut selector, &mut observer);
    observer.finish();
    let data = result.context("Reading flash failed")?;

    fs::write(file, &data).with_context(|| format!("Failed to write {}", file.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} Saved {} bytes to {}",
            style("✓").green().bold(),
            data.len(),
            style(file.display()).yellow()
        );
    }

    Ok(())
}
