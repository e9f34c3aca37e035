//! Flash command implementation and the terminal progress observer.

use {
    crate::{
        Cli, CliError, check_chip, config::Config, open_session, serial::PromptSelector,
        session_config, target_port, use_fancy_output, was_interrupted,
    },
    anyhow::{Context, Result},
    console::style,
    indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle},
    samflash::{FirmwareImage, FlashOutcome, Observer, SessionConfig},
    std::path::Path,
};

/// Flash settings resolved from flags and config.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FlashOptions {
    pub offset: u32,
    pub verify: bool,
    pub reset_after: bool,
}

/// Renders library status lines and progress on stderr.
pub(crate) struct ProgressObserver {
    pb: ProgressBar,
    quiet: bool,
}

impl ProgressObserver {
    pub(crate) fn new(quiet: bool) -> Self {
        let pb = if quiet || !use_fancy_output() {
            ProgressBar::hidden()
        } else {
            let pb = ProgressBar::new(0);
            if let Ok(bar_style) = ProgressStyle::default_bar().template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            ) {
                pb.set_style(bar_style.progress_chars("#>-"));
            }
            pb.set_draw_target(ProgressDrawTarget::stderr());
            pb
        };
        Self { pb, quiet }
    }

    pub(crate) fn finish(&self) {
        self.pb
            .finish_and_clear();
    }
}

impl Observer for ProgressObserver {
    fn on_status(&mut self, message: &str) {
        if self.quiet {
            return;
        }
        self.pb
            .suspend(|| eprintln!("{} {message}", style("•").dim()));
    }

    fn on_progress(&mut self, current: u32, total: u32) {
        let total = u64::from(total);
        if self.pb.length() != Some(total) {
            self.pb
                .set_length(total);
        }
        self.pb
            .set_position(u64::from(current));
    }
}

/// Flash command implementation.
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &mut Config,
    file: &Path,
    options: &FlashOptions,
) -> Result<()> {
    let image = FirmwareImage::from_file(file)
        .with_context(|| format!("Failed to load firmware {}", file.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} Loaded {} ({} bytes)",
            style("📦").cyan(),
            file.display(),
            image.len()
        );
    }
    if image.is_empty() {
        return Err(CliError::Usage(format!("{} is empty", file.display())).into());
    }

    let port = target_port(cli, config);
    if !cli.quiet {
        match &port {
            Some(name) => eprintln!("{} Using port {}", style("🔌").cyan(), style(name).cyan()),
            None => eprintln!("{} Searching for a bootloader port", style("🔍").cyan()),
        }
    }

    let mut session = open_session(SessionConfig {
        offset: options.offset,
        verify: options.verify,
        reset_after: options.reset_after,
        ..session_config(cli, config)
    });
    let mut selector = PromptSelector::new(cli.non_interactive, config);

    if cli.chip.is_some() {
        let device = session
            .identify(port.as_deref(), &mut selector)
            .context("Failed to identify chip")?;
        check_chip(cli, device.family())?;
    }

    let mut observer = ProgressObserver::new(cli.quiet);
    let result = session.flash(port.as_deref(), &image, &mut selector, &mut observer);
    observer.finish();

    if was_interrupted() {
        return Err(CliError::Cancelled("Interrupted by user".into()).into());
    }

    match result.context("Flashing failed")? {
        FlashOutcome::Flashed { device, bytes } => {
            if !cli.quiet {
                eprintln!(
                    "{} Wrote {bytes} bytes to {device}",
                    style("✓").green().bold()
                );
                if !options.reset_after {
                    eprintln!("{} Board left in bootloader", style("ℹ").blue());
                }
            }
        },
        FlashOutcome::Cancelled => {
            eprintln!("{} Port selection cancelled, nothing written", style("ℹ").blue());
        },
    }

    Ok(())
}
