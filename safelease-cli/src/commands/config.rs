use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use shared::config::server::{Config, ConfigFormat, Profile};

/// Renders the defaults for `profile` in `format`, to `output` or stdout.
///
/// # Errors
/// Returns an error if rendering or writing the file fails.
pub fn generate_config(format: ConfigFormat, profile: Profile, output: Option<&Path>) -> Result<()> {
    let rendered = Config::default_for_profile(profile)
        .render(format)
        .context("failed to render configuration")?;

    match output {
        Some(path) => {
            fs::write(path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Configuration written to {}", path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn written_file_loads_back() {
        let dir = tempdir().unwrap();
        for (format, name) in [
            (ConfigFormat::Yaml, "chat.yaml"),
            (ConfigFormat::Json, "chat.json"),
            (ConfigFormat::Toml, "chat.toml"),
        ] {
            let path = dir.path().join(name);
            generate_config(format, Profile::Dev, Some(&path)).unwrap();
            let loaded = Config::from_file(&path).unwrap();
            assert_eq!(loaded, Config::default_for_profile(Profile::Dev));
        }
    }
}
