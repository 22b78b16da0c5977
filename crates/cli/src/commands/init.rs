//! `parley init`: Write a starter config file.

use parley_config::AppConfig;
use std::path::Path;

pub fn run(config_path: Option<&Path>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path.map(Path::to_path_buf).unwrap_or_else(AppConfig::default_path);

    if write_default(&path, force)? {
        println!("Created config at: {}", path.display());
        println!();
        println!("Next steps:");
        println!("   1. Point [engine] at your model server, or set kind = \"local\"");
        println!("   2. Run: parley chat");
    } else {
        println!("Config already exists at: {}", path.display());
        println!("   Edit it manually or re-run with --force.");
    }

    Ok(())
}

/// Write the default config to `path`. Returns `false` if a file was already
/// there and `force` is off.
fn write_default(path: &Path, force: bool) -> std::io::Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, AppConfig::default_toml())?;
    Ok(true)
}
