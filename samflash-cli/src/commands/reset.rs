//! Touch-reset command implementation.

use {
    crate::{Cli, config::Config, serial::PromptSelector, target_port},
    anyhow::Result,
    console::style,
    samflash::{
        NativePortProvider, NoSelection, PortSelector, TouchConfig, detect_ports,
        discover_bootloader_port, reset_to_bootloader,
    },
};

/// Reset command implementation.
///
/// Touches the named port, or the single running board found on the bus,
/// and reports where the bootloader came up.
pub(crate) fn cmd_reset(cli: &Cli, config: &mut Config) -> Result<()> {
    let allow_list = config.allow_list();
    let mut provider = NativePortProvider;

    let port = match target_port(cli, config) {
        Some(name) => name,
        None => {
            let ports = detect_ports(&mut provider)?;
            if ports.is_empty() {
                return Err(samflash::Error::PortNotFound.into());
            }
            let candidates: Vec<_> = ports
                .iter()
                .filter(|p| p.is_allowed(&allow_list))
                .cloned()
                .collect();
            let choice = if candidates.len() == 1 {
                candidates.into_iter().next()
            } else {
                let pool = if candidates.is_empty() { ports } else { candidates };
                PromptSelector::new(cli.non_interactive, config).select(&pool)?
            };
            choice
                .ok_or(samflash::Error::UserCancelled)?
                .name
        },
    };

    if !cli.quiet {
        eprintln!("{} Touching {} at 1200 baud", style("⚡").yellow(), style(&port).cyan());
    }

    if !reset_to_bootloader(&mut provider, &port, &TouchConfig::default()) {
        eprintln!(
            "{} Could not open {port}, the board may already be in its bootloader",
            style("⚠").yellow()
        );
    }

    match discover_bootloader_port(&mut provider, &allow_list, &mut NoSelection) {
        Ok(found) if !cli.quiet => eprintln!(
            "{} Bootloader is on {}",
            style("✓").green().bold(),
            style(&found.name).cyan().bold()
        ),
        Ok(_) => {},
        Err(e) => log::warn!("Bootloader port not found after reset: {e}"),
    }

    Ok(())
}
