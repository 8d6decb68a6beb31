use std::path::PathBuf;

use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand};

use crate::mirror::config_loader::{ConfigResult, MirrorConfig, default_config_path};

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::Red.on_default());

#[derive(Parser, Debug)]
#[command(name = "smugmirror")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "Mirror SmugMug albums to a local folder tree and audit the copy")]
#[command(long_about = r#"
smugmirror keeps a local copy of a SmugMug account.

Albums land under <mirror_root>/<category>/<subcategory>/<title>. Remote
listings and local checksums are cached between runs, so repeat runs only
fetch changed albums and only hash changed files.

Examples:
  smugmirror get-albums           Mirror every album
  smugmirror get-album "Trip"     Mirror one album by title
  smugmirror check --refresh      Report drift between SmugMug and disk
"#)]
pub(crate) struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config.toml (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the mirror root from the config file
    #[arg(long, global = true)]
    pub mirror_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    /// List album titles
    ListAlbums,

    /// Mirror the albums with this title
    GetAlbum {
        name: String,

        /// Print what would be downloaded without downloading it
        #[arg(long)]
        dry_run: bool,
    },

    /// Mirror every album
    GetAlbums {
        /// Print what would be downloaded without downloading it
        #[arg(long)]
        dry_run: bool,
    },

    /// Refresh the cached album and image listings
    CacheRemote,

    /// Compare the mirror against the catalog; exits 1 on any discrepancy
    Check {
        /// Refresh the remote cache first
        #[arg(long)]
        refresh: bool,
    },

    /// Report local files with identical content; exits 1 if any exist
    FindDuplicates,
}

impl Cli {
    /// Loads the config file and applies command line overrides.
    pub fn load_config(&self) -> ConfigResult<MirrorConfig> {
        let path = match &self.config {
            Some(path) => path.clone(),
            None => default_config_path()?,
        };
        let mut config = MirrorConfig::load(&path)?;
        if let Some(root) = &self.mirror_root {
            config.paths.mirror_root = root.clone();
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use tempfile::tempdir;

    #[test]
    fn test_parses_subcommands() {
        let cli = Cli::try_parse_from(["smugmirror", "get-album", "Trip", "--dry-run"]).unwrap();
        assert_eq!(
            cli.command,
            Command::GetAlbum {
                name: "Trip".to_string(),
                dry_run: true
            }
        );

        let cli = Cli::try_parse_from(["smugmirror", "check", "--refresh", "-v"]).unwrap();
        assert_eq!(cli.command, Command::Check { refresh: true });
        assert!(cli.verbose);

        assert!(Cli::try_parse_from(["smugmirror", "get-album"]).is_err());
    }

    #[test]
    fn test_mirror_root_flag_overrides_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[account]\nnickname = \"someone\"\napi_key = \"key\"\n\n[paths]\nmirror_root = \"/from/file\"\n",
        )
        .unwrap();

        let config_arg = path.to_string_lossy().to_string();
        let cli = Cli::try_parse_from([
            "smugmirror",
            "--config",
            config_arg.as_str(),
            "--mirror-root",
            "/from/flag",
            "find-duplicates",
        ])
        .unwrap();

        let config = cli.load_config().unwrap();
        assert_eq!(config.paths.mirror_root, PathBuf::from("/from/flag"));
    }
}
