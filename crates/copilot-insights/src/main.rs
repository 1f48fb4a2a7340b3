mod bootstrap;

use std::process::ExitCode;

use anyhow::{bail, Result};
use insights_core::error::InsightsError;
use insights_core::registry::MetricsRegistry;
use insights_core::settings::Settings;
use insights_runtime::data_manager::DataManager;
use insights_runtime::dispatch::ToolDispatcher;
use serde_json::json;

/// Exit code for requests the caller can fix (unknown tool, governance
/// rejection, bad argument).
const EXIT_REQUEST_ERROR: u8 = 2;

fn main() -> Result<ExitCode> {
    let settings = Settings::load();

    bootstrap::ensure_log_directory(settings.log_file.as_deref())?;
    bootstrap::setup_logging(&settings.log_level, settings.log_file.as_deref())?;

    tracing::info!("Copilot Insights v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::debug!(
        segment_csv = %settings.segment_csv.display(),
        premium_csv = %settings.premium_csv.display(),
        "configured sources"
    );

    let registry = match &settings.metrics_catalogue {
        Some(path) => MetricsRegistry::install(MetricsRegistry::from_path(path)?)?,
        None => MetricsRegistry::global(),
    };
    let dispatcher = ToolDispatcher::with_registry(DataManager::from_settings(&settings), registry);

    let outcome = run(&settings, &dispatcher)?;
    println!("{}", outcome.body);
    Ok(ExitCode::from(outcome.exit_code))
}

/// Rendered stdout payload and the process exit code.
struct Outcome {
    body: String,
    exit_code: u8,
}

fn run(settings: &Settings, dispatcher: &ToolDispatcher<'_>) -> Result<Outcome> {
    let value = if settings.list_tools {
        serde_json::to_value(dispatcher.list_tools())?
    } else if settings.health {
        serde_json::to_value(dispatcher.data().health())?
    } else if let Some(tool) = settings.tool.as_deref() {
        let dispatched = settings
            .tool_arguments()
            .and_then(|args| dispatcher.dispatch_json(Some(tool), args));
        match dispatched {
            Ok(result) => serde_json::to_value(result)?,
            Err(e) if e.is_request_error() => {
                tracing::warn!(tool, error = %e, "request rejected");
                return Ok(Outcome {
                    body: render(&error_body(&e), settings.pretty)?,
                    exit_code: EXIT_REQUEST_ERROR,
                });
            }
            Err(e) => return Err(e.into()),
        }
    } else {
        bail!("nothing to do: pass --tool, --list-tools or --health");
    };

    Ok(Outcome {
        body: render(&value, settings.pretty)?,
        exit_code: 0,
    })
}

fn error_body(error: &InsightsError) -> serde_json::Value {
    let kind = match error {
        InsightsError::Governance(_) => "governance",
        InsightsError::UnknownTool(_) => "unknown_tool",
        _ => "invalid_argument",
    };
    json!({ "error": { "kind": kind, "message": error.to_string() } })
}

fn render(value: &serde_json::Value, pretty: bool) -> Result<String> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(text)
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const ADOPTION: &str = "\
Month,Segment,Active_users_FTE,total_seats_FTE
2025-01,Asia,80,100
2025-02,Asia,90,100
";

    const PREMIUM: &str = "\
request_date,enterprise,model,quantity,gross_amount,discount_amount,net_amount,mfcgd_id,is_employee,segment
2025-01-10,Contoso,gpt-4o,2,10.00,0,10.00,u1,true,Asia
2025-01-11,Contoso,gpt-4o,1,5.00,0,5.00,u2,true,Asia
";

    fn sources() -> (TempDir, PathBuf, PathBuf) {
        let tmp = TempDir::new().expect("tempdir");
        let segment = tmp.path().join("segment_adoption.csv");
        let premium = tmp.path().join("premium_requests.csv");
        std::fs::write(&segment, ADOPTION).expect("write adoption");
        std::fs::write(&premium, PREMIUM).expect("write premium");
        (tmp, segment, premium)
    }

    fn settings(segment: &PathBuf, premium: &PathBuf, extra: &[&str]) -> Settings {
        let mut args = vec![
            "copilot-insights".to_string(),
            "--segment-csv".to_string(),
            segment.display().to_string(),
            "--premium-csv".to_string(),
            premium.display().to_string(),
        ];
        args.extend(extra.iter().map(|s| s.to_string()));
        Settings::load_from_args(args).expect("settings")
    }

    fn execute(settings: &Settings) -> (serde_json::Value, u8) {
        let registry = MetricsRegistry::builtin();
        let dispatcher =
            ToolDispatcher::with_registry(DataManager::from_settings(settings), &registry);
        let outcome = run(settings, &dispatcher).expect("run");
        let value = serde_json::from_str(&outcome.body).expect("json output");
        (value, outcome.exit_code)
    }

    #[test]
    fn test_tool_invocation_outputs_result() {
        let (_tmp, segment, premium) = sources();
        let s = settings(
            &segment,
            &premium,
            &["--tool", "adoption_trend", "--args", r#"{"filters": {"segment": "Asia"}}"#],
        );
        let (value, code) = execute(&s);

        assert_eq!(code, 0);
        assert_eq!(value["tool"], "adoption_trend");
        assert_eq!(value["output"]["kind"], "table");
        assert_eq!(value["output"]["rows"][0][1], 80.0);
        assert_eq!(value["output"]["rows"][1][1], 90.0);
        assert_eq!(value["empty"], false);
    }

    #[test]
    fn test_governance_rejection_is_structured() {
        let (_tmp, segment, premium) = sources();
        let s = settings(
            &segment,
            &premium,
            &["--tool", "adoption_summary", "--args", r#"{"metric": "revenue"}"#],
        );
        let (value, code) = execute(&s);

        assert_eq!(code, EXIT_REQUEST_ERROR);
        assert_eq!(value["error"]["kind"], "governance");
        assert!(value["error"]["message"]
            .as_str()
            .unwrap()
            .contains("Unknown metric: revenue"));
    }

    #[test]
    fn test_unknown_tool_is_structured() {
        let (_tmp, segment, premium) = sources();
        let s = settings(&segment, &premium, &["--tool", "export_everything"]);
        let (value, code) = execute(&s);
        assert_eq!(code, EXIT_REQUEST_ERROR);
        assert_eq!(value["error"]["kind"], "unknown_tool");
    }

    #[test]
    fn test_malformed_args_is_request_error() {
        let (_tmp, segment, premium) = sources();
        let s = settings(&segment, &premium, &["--tool", "list_segments", "--args", "[1]"]);
        let (value, code) = execute(&s);
        assert_eq!(code, EXIT_REQUEST_ERROR);
        assert_eq!(value["error"]["kind"], "invalid_argument");
    }

    #[test]
    fn test_list_tools() {
        let (_tmp, segment, premium) = sources();
        let s = settings(&segment, &premium, &["--list-tools"]);
        let (value, _) = execute(&s);
        let tools = value.as_array().expect("array");
        assert_eq!(tools.len(), 9);
        assert_eq!(tools[0]["name"], "adoption_summary");
    }

    #[test]
    fn test_health() {
        let (_tmp, segment, premium) = sources();
        let s = settings(&segment, &premium, &["--health"]);
        let (value, _) = execute(&s);
        assert_eq!(value["status"], "ok");
        assert_eq!(value["datasets"][0]["rows"], 2);
        assert_eq!(value["datasets"][1]["rows"], 2);
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let tmp = TempDir::new().expect("tempdir");
        let missing = tmp.path().join("missing.csv");
        let s = settings(&missing, &missing, &["--tool", "adoption_summary"]);
        let registry = MetricsRegistry::builtin();
        let dispatcher = ToolDispatcher::with_registry(DataManager::from_settings(&s), &registry);
        let err = run(&s, &dispatcher).err().expect("source error");
        assert!(err.to_string().contains("Source not found"));
    }

    #[test]
    fn test_nothing_to_do() {
        let (_tmp, segment, premium) = sources();
        let s = settings(&segment, &premium, &[]);
        let registry = MetricsRegistry::builtin();
        let dispatcher = ToolDispatcher::with_registry(DataManager::from_settings(&s), &registry);
        assert!(run(&s, &dispatcher).is_err());
    }
}
