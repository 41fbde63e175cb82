use clap::Parser;
use clap_complete::Shell;
use std::path::PathBuf;

use crate::config::SimConfig;
use crate::error::Result;

#[derive(Parser, Debug)]
#[command(name = "chatstorm")]
#[command(version)]
#[command(about = "A fake live-stream chat: weighted spam, emotes and voice-switched moods")]
pub struct Args {
    /// TOML file replacing the built-in pools, emotes and keywords
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Port for the web UI server
    #[arg(long, default_value = "8888")]
    pub port: u16,

    /// Run the chat in this terminal instead of serving the web page
    #[arg(long)]
    pub terminal: bool,

    /// Do not start spamming on launch
    #[arg(long)]
    pub no_autostart: bool,

    /// Initial spam category (overrides the config)
    #[arg(long)]
    pub category: Option<String>,

    /// Initial speed slider position, 0-100 (overrides the config)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub speed: Option<u8>,

    /// Seed the random source for a reproducible chat
    #[arg(long)]
    pub seed: Option<u64>,

    /// Do not open a browser tab when serving the web UI
    #[arg(long)]
    pub no_browser: bool,

    /// Directory of emote images served under /emotes/
    #[arg(long)]
    pub emote_dir: Option<PathBuf>,

    /// Tracing filter, e.g. "debug" or "chatstorm=trace" (defaults to RUST_LOG, then info)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Print a shell completion script and exit
    #[arg(long, value_enum)]
    pub completions: Option<Shell>,
}

impl Args {
    /// Load the config named by `--config` (or the built-in one) and apply
    /// command-line overrides.
    pub fn load_config(&self) -> Result<SimConfig> {
        let mut config = match &self.config {
            Some(path) => SimConfig::load(path)?,
            None => SimConfig::builtin()?,
        };
        self.apply_overrides(&mut config)?;
        Ok(config)
    }

    /// Fold flags into `config` and re-validate it.
    pub fn apply_overrides(&self, config: &mut SimConfig) -> Result<()> {
        if let Some(category) = &self.category {
            config.spam.category = category.clone();
        }
        if let Some(speed) = self.speed {
            config.spam.speed = speed;
        }
        if self.no_autostart {
            config.spam.autostart = false;
        }
        if let Some(dir) = &self.emote_dir {
            config.emotes.dir = Some(dir.clone());
        }
        config.validate()
    }

    pub fn open_browser(&self) -> bool {
        !self.no_browser && !self.terminal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SimError;

    #[test]
    fn test_args_parse_minimal() {
        let args = Args::parse_from(["chatstorm"]);
        assert_eq!(args.port, 8888);
        assert!(!args.terminal);
        assert!(!args.no_autostart);
        assert!(args.config.is_none());
        assert!(args.category.is_none());
        assert!(args.speed.is_none());
        assert!(args.seed.is_none());
        assert!(args.open_browser());
    }

    #[test]
    fn test_args_parse_full() {
        let args = Args::parse_from([
            "chatstorm",
            "--port",
            "9000",
            "--terminal",
            "--no-autostart",
            "--category",
            "jams",
            "--speed",
            "80",
            "--seed",
            "42",
            "--log-level",
            "debug",
        ]);
        assert_eq!(args.port, 9000);
        assert!(args.terminal);
        assert!(args.no_autostart);
        assert_eq!(args.category.as_deref(), Some("jams"));
        assert_eq!(args.speed, Some(80));
        assert_eq!(args.seed, Some(42));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(!args.open_browser());
    }

    #[test]
    fn test_args_speed_out_of_range_rejected() {
        assert!(Args::try_parse_from(["chatstorm", "--speed", "101"]).is_err());
    }

    #[test]
    fn test_args_completions_shell() {
        let args = Args::parse_from(["chatstorm", "--completions", "bash"]);
        assert_eq!(args.completions, Some(Shell::Bash));
    }

    #[test]
    fn test_args_no_browser() {
        let args = Args::parse_from(["chatstorm", "--no-browser"]);
        assert!(!args.open_browser());
    }

    #[test]
    fn test_overrides_applied() {
        let args = Args::parse_from([
            "chatstorm",
            "--category",
            "weebs",
            "--speed",
            "0",
            "--no-autostart",
            "--emote-dir",
            "/tmp/emotes",
        ]);
        let config = args.load_config().unwrap();
        assert_eq!(config.spam.category, "weebs");
        assert_eq!(config.spam.speed, 0);
        assert!(!config.spam.autostart);
        assert_eq!(config.emotes.dir, Some(PathBuf::from("/tmp/emotes")));
    }

    #[test]
    fn test_unknown_category_override_fails_validation() {
        let args = Args::parse_from(["chatstorm", "--category", "memes"]);
        assert!(matches!(args.load_config(), Err(SimError::Validation(_))));
    }

    #[test]
    fn test_missing_config_file() {
        let args = Args::parse_from(["chatstorm", "--config", "/definitely/not/here.toml"]);
        assert!(matches!(args.load_config(), Err(SimError::ConfigRead { .. })));
    }
}
