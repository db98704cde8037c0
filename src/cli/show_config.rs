use std::error::Error;
use std::path::{Path, PathBuf};

use crate::core::config::data::path_display;
use crate::core::config::Config;

fn target_path(explicit: Option<&Path>) -> Result<PathBuf, Box<dyn Error>> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => Config::default_path()
            .ok_or_else(|| "could not determine the config directory; pass --config".into()),
    }
}

pub fn run_config(
    config: &Config,
    explicit: Option<&Path>,
    init: bool,
    force: bool,
) -> Result<(), Box<dyn Error>> {
    if !init {
        print!("{}", toml::to_string_pretty(config)?);
        return Ok(());
    }

    let path = target_path(explicit)?;
    if path.exists() && !force {
        eprintln!(
            "Config already exists at {}; use --force to overwrite",
            path_display(&path)
        );
        std::process::exit(1);
    }
    Config::default().save_to_path(&path)?;
    println!("✅ Wrote default config to {}", path_display(&path));
    Ok(())
}
