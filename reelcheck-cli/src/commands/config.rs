use crate::config::ConfigLoader;
use anyhow::Result;
use clap::{Args, Subcommand};

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration (merged)
    Show,
    /// Show configuration file paths
    Path,
}

pub fn run(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommands::Show => show_config(),
        ConfigCommands::Path => show_paths(),
    }
}

fn show_config() -> Result<()> {
    let config = ConfigLoader::load()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{}", toml_str);
    Ok(())
}

fn show_paths() -> Result<()> {
    let user = ConfigLoader::user_config_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(no home directory)".to_string());
    let config = ConfigLoader::load()?;

    println!("User config:    {}", user);
    println!("Project config: {}", ConfigLoader::project_config_path().display());
    println!("Videos:         {}", config.data_dir.display());
    println!("Cost ledger:    {}", config.ledger_path.display());
    println!("Catalog:        {}", config.catalog_path().display());
    println!("Rubrics:        {}", config.rubrics.dir.display());
    Ok(())
}
