//! `playtime init [--force]`

use anyhow::{Context, Result};
use clap::Args;

use playtime_core::config::CONFIG_FILE;
use playtime_core::Config;

use super::Env;

/// Create the data directory, a default `config.yaml` and the database.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing config.yaml with the defaults.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let env = Env::load()?;
        let config_path = env.data_dir.join(CONFIG_FILE);

        if self.force || !config_path.exists() {
            Config::default()
                .save_to(&env.data_dir)
                .with_context(|| format!("failed to write {}", config_path.display()))?;
            println!("✓ Wrote {}", config_path.display());
        } else {
            println!("  Keeping existing {}", config_path.display());
        }

        let repo = env.open_repo()?;
        let version = repo.schema_version().context("failed to read schema version")?;
        println!(
            "✓ Database ready at {} (schema v{version})",
            repo.path().display()
        );
        Ok(())
    }
}
