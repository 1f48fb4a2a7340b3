use clap::Parser;
use std::path::{Path, PathBuf};

use crate::error::{InsightsError, Result};

/// Default location of the segment adoption export.
pub const DEFAULT_SEGMENT_ADOPTION_CSV: &str = "data/copilot/segment_adoption.csv";
/// Default location of the premium request billing export.
pub const DEFAULT_PREMIUM_REQUESTS_CSV: &str = "data/copilot/premium_requests_db.csv";

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Governed Copilot usage analytics over exported CSV snapshots
#[derive(Parser, Debug, Clone)]
#[command(
    name = "copilot-insights",
    about = "Governed Copilot usage analytics over exported CSV snapshots",
    version
)]
pub struct Settings {
    /// Segment adoption CSV export
    #[arg(
        long,
        env = "COPILOT_SEGMENT_ADOPTION_CSV",
        default_value = DEFAULT_SEGMENT_ADOPTION_CSV
    )]
    pub segment_csv: PathBuf,

    /// Premium requests CSV export
    #[arg(
        long,
        env = "COPILOT_PREMIUM_REQUESTS_CSV",
        default_value = DEFAULT_PREMIUM_REQUESTS_CSV
    )]
    pub premium_csv: PathBuf,

    /// JSON metrics catalogue replacing the built-in definitions
    #[arg(long, env = "COPILOT_METRICS_CATALOGUE")]
    pub metrics_catalogue: Option<PathBuf>,

    /// Tool to invoke (see --list-tools)
    #[arg(long)]
    pub tool: Option<String>,

    /// Tool request as a JSON object: {"metric", "filters", "options", "question"}
    #[arg(long, default_value = "{}")]
    pub args: String,

    /// Print the tool catalogue and exit
    #[arg(long)]
    pub list_tools: bool,

    /// Report which datasets load and exit
    #[arg(long)]
    pub health: bool,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Logging level
    #[arg(long, default_value = "WARNING", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"])]
    pub log_level: String,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Settings {
    /// Parse process arguments and resolve derived values.
    pub fn load() -> Self {
        Self::parse().resolve()
    }

    /// Same as [`Settings::load`] but from an explicit argument list.
    pub fn load_from_args<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::try_parse_from(args)
            .map(Self::resolve)
            .map_err(|e| InsightsError::Config(e.to_string()))
    }

    /// Expand `~` in configured paths and apply the `--debug` flag.
    fn resolve(mut self) -> Self {
        self.segment_csv = expand_home(&self.segment_csv);
        self.premium_csv = expand_home(&self.premium_csv);
        self.metrics_catalogue = self.metrics_catalogue.as_deref().map(expand_home);
        self.log_file = self.log_file.as_deref().map(expand_home);

        if self.debug {
            self.log_level = "DEBUG".to_string();
        }
        self
    }

    /// Parse `--args` into a JSON object.
    pub fn tool_arguments(&self) -> Result<serde_json::Value> {
        let value: serde_json::Value = serde_json::from_str(&self.args)?;
        if !value.is_object() {
            return Err(InsightsError::InvalidArgument(
                "--args must be a JSON object".to_string(),
            ));
        }
        Ok(value)
    }
}

/// Replace a leading `~` with the user's home directory.
///
/// Paths without a leading `~`, or a host without a home directory, are
/// returned unchanged.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default_paths() {
        let settings = Settings::try_parse_from(["copilot-insights"]).expect("parse");

        // Only meaningful when the environment does not override the defaults.
        if std::env::var_os("COPILOT_SEGMENT_ADOPTION_CSV").is_none() {
            assert_eq!(settings.segment_csv, PathBuf::from(DEFAULT_SEGMENT_ADOPTION_CSV));
        }
        if std::env::var_os("COPILOT_PREMIUM_REQUESTS_CSV").is_none() {
            assert_eq!(settings.premium_csv, PathBuf::from(DEFAULT_PREMIUM_REQUESTS_CSV));
        }
        assert_eq!(settings.args, "{}");
        assert_eq!(settings.log_level, "WARNING");
        assert!(settings.tool.is_none());
        assert!(!settings.list_tools);
        assert!(!settings.health);
    }

    #[test]
    fn test_settings_flags_override() {
        let settings = Settings::load_from_args([
            "copilot-insights",
            "--segment-csv",
            "/tmp/seg.csv",
            "--premium-csv",
            "/tmp/prem.csv",
            "--tool",
            "adoption_summary",
        ])
        .expect("parse");

        assert_eq!(settings.segment_csv, PathBuf::from("/tmp/seg.csv"));
        assert_eq!(settings.premium_csv, PathBuf::from("/tmp/prem.csv"));
        assert_eq!(settings.tool.as_deref(), Some("adoption_summary"));
    }

    #[test]
    fn test_debug_flag_overrides_log_level() {
        let settings =
            Settings::load_from_args(["copilot-insights", "--log-level", "ERROR", "--debug"])
                .expect("parse");
        assert_eq!(settings.log_level, "DEBUG");
    }

    #[test]
    fn test_invalid_log_level_is_config_error() {
        let err = Settings::load_from_args(["copilot-insights", "--log-level", "LOUD"]).unwrap_err();
        assert!(matches!(err, InsightsError::Config(_)));
    }

    #[test]
    fn test_tool_arguments_must_be_object() {
        let mut settings = Settings::try_parse_from(["copilot-insights"]).expect("parse");
        settings.args = r#"{"metric": "segment_fte_adoption"}"#.to_string();
        let args = settings.tool_arguments().expect("object");
        assert_eq!(args["metric"], "segment_fte_adoption");

        settings.args = "[1, 2]".to_string();
        assert!(matches!(
            settings.tool_arguments(),
            Err(InsightsError::InvalidArgument(_))
        ));

        settings.args = "{not json".to_string();
        assert!(matches!(settings.tool_arguments(), Err(InsightsError::JsonParse(_))));
    }

    #[test]
    fn test_expand_home() {
        let plain = PathBuf::from("/var/data/x.csv");
        assert_eq!(expand_home(&plain), plain);

        let relative = PathBuf::from("data/copilot/x.csv");
        assert_eq!(expand_home(&relative), relative);

        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home(Path::new("~/exports/a.csv")), home.join("exports/a.csv"));
        }
    }
}
