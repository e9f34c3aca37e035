//! Interactive serial port selection.
//!
//! The library asks for a manual choice only when no port matches the
//! bootloader allow-list. This module answers that question with a
//! `dialoguer` prompt, and offers to remember the chosen USB device so the
//! next run finds it on its own. Without a terminal to prompt on, selection
//! fails instead of declining.

use {
    crate::config::Config,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{error, warn},
    samflash::{DetectedPort, PortSelector},
    std::io::{self, IsTerminal},
};

/// [`PortSelector`] backed by terminal prompts.
///
/// Fails with [`samflash::Error::PortNotFound`] in non-interactive mode or
/// when stdin/stderr is not a terminal.
pub(crate) struct PromptSelector<'a> {
    non_interactive: bool,
    config: &'a mut Config,
}

impl<'a> PromptSelector<'a> {
    pub(crate) fn new(non_interactive: bool, config: &'a mut Config) -> Self {
        Self {
            non_interactive,
            config,
        }
    }

    fn can_prompt(&self) -> bool {
        !self.non_interactive && io::stdin().is_terminal() && io::stderr().is_terminal()
    }
}

impl PortSelector for PromptSelector<'_> {
    fn select(&mut self, candidates: &[DetectedPort]) -> samflash::Result<Option<DetectedPort>> {
        if candidates.is_empty() {
            return Ok(None);
        }

        if !self.can_prompt() {
            warn!(
                "No bootloader port recognized among {} port(s); pass one with --port",
                candidates.len()
            );
            for line in samflash::format_port_list(candidates) {
                warn!("  {line}");
            }
            return Err(samflash::Error::PortNotFound);
        }

        let Some(port) = prompt_port(candidates)? else {
            return Ok(None);
        };
        ask_remember_port(&port, self.config)?;
        Ok(Some(port))
    }
}

fn prompt_error(err: DialoguerError) -> Option<samflash::Error> {
    match err {
        // Ctrl-C at the prompt declines.
        DialoguerError::IO(io_err) if io_err.kind() == io::ErrorKind::Interrupted => None,
        DialoguerError::IO(io_err) => Some(io_err.into()),
    }
}

fn port_label(port: &DetectedPort) -> String {
    let ids = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };
    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();
    format!("{}{ids}{product}", port.name)
}

fn prompt_port(candidates: &[DetectedPort]) -> samflash::Result<Option<DetectedPort>> {
    eprintln!(
        "{} No known bootloader found, {} port(s) available",
        style("ℹ").blue(),
        candidates.len()
    );

    // Truncate labels to fit terminal width to prevent wrapping.
    let term_width = console::Term::stderr()
        .size()
        .1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = candidates
        .iter()
        .map(|p| console::truncate_str(&port_label(p), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = match Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the bootloader port")
        .items(&labels)
        .default(0)
        .interact_opt()
    {
        Ok(selection) => selection,
        Err(e) => return prompt_error(e).map_or(Ok(None), Err),
    };

    Ok(selection.and_then(|index| {
        candidates
            .get(index)
            .cloned()
    }))
}

/// Offer to remember the chosen USB device for future discovery.
fn ask_remember_port(port: &DetectedPort, config: &mut Config) -> samflash::Result<()> {
    let (Some(vid), Some(pid)) = (port.vid, port.pid) else {
        return Ok(());
    };
    if config.knows_usb_device(vid, pid) {
        return Ok(());
    }

    let confirmed = match Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Remember this device for next time?")
        .default(false)
        .interact_opt()
    {
        Ok(answer) => answer.unwrap_or(false),
        Err(e) => match prompt_error(e) {
            Some(err) => return Err(err),
            None => false,
        },
    };

    if confirmed {
        if let Err(e) = config.remember_usb_device(vid, pid) {
            error!("Failed to save port configuration: {e}");
        }
    }

    Ok(())
}
