use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::Args;
use tally_core::config::{ProjectConfig, TALLY_DIR};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing `.tally/config.toml`. Local data is kept.
    #[arg(long)]
    pub force: bool,

    /// Shared directory acting as the server copy; created if missing.
    #[arg(long, value_name = "DIR")]
    pub remote: Option<PathBuf>,

    /// Minimum seconds between automatic syncs.
    #[arg(long, value_name = "SECS")]
    pub min_interval: Option<u64>,
}

const GITIGNORE: &str = "items.json\noutbox.json\nsync.json\n*.lock\n";

/// Execute `tally init`. Creates:
///
/// ```text
/// .tally/
///   config.toml   (sync and limits)
///   .gitignore    (local data and lock files)
/// ```
///
/// # Errors
///
/// Returns an error if `.tally/` already exists and `--force` is not set,
/// or if any filesystem operation fails.
pub fn run_init(args: &InitArgs, project_root: &Path) -> Result<()> {
    let tally_dir = project_root.join(TALLY_DIR);
    if tally_dir.exists() && !args.force {
        anyhow::bail!("{TALLY_DIR}/ already exists. Use `tally init --force` to rewrite its config.");
    }
    std::fs::create_dir_all(&tally_dir)
        .with_context(|| format!("Failed to create {}", tally_dir.display()))?;

    let mut config = ProjectConfig::default();
    if let Some(secs) = args.min_interval {
        config.sync.min_interval_secs = secs;
    }
    if let Some(remote) = &args.remote {
        let resolved = if remote.is_absolute() {
            remote.clone()
        } else {
            project_root.join(remote)
        };
        std::fs::create_dir_all(&resolved)
            .with_context(|| format!("Failed to create remote directory {}", resolved.display()))?;
        config.sync.remote_dir = Some(remote.clone());
    }

    let config_path = tally_dir.join("config.toml");
    let rendered = toml::to_string_pretty(&config).context("Failed to render config")?;
    std::fs::write(&config_path, rendered)
        .with_context(|| format!("Failed to write config: {}", config_path.display()))?;

    let gitignore_path = tally_dir.join(".gitignore");
    std::fs::write(&gitignore_path, GITIGNORE)
        .with_context(|| format!("Failed to write .gitignore: {}", gitignore_path.display()))?;

    println!("\u{2713} Initialized {TALLY_DIR}/");
    println!();
    println!("  Config: {TALLY_DIR}/config.toml");
    match &args.remote {
        Some(remote) => println!("  Remote: {}", remote.display()),
        None => println!("  Remote: none (offline only; changes stay queued)"),
    }
    println!();
    println!("Next steps:");
    println!("  Set your identity (required to sync):");
    println!("    export TALLY_ACTOR=your-name");
    println!();
    println!("  Track your first habit:");
    println!("    tally add \"Read\" --kind binary");
    Ok(())
}
