use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use vouch_engine::{preflight, EngineConfig};
use vouch_formula::{AnchorFormula, Verifier};
use vouch_state::RawTable;

fn cli() -> Command {
    Command::new("vouch")
        .version(vouch_core::VERSION)
        .about("Financial document verification")
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("verify")
                .about("Check anchor formulas against a table")
                .arg(
                    Arg::new("table")
                        .long("table")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Table as JSON"),
                )
                .arg(
                    Arg::new("formulas")
                        .long("formulas")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Anchor formulas as a JSON array"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("Engine configuration (TOML); supplies the tolerance"),
                ),
        )
        .subcommand(
            Command::new("preflight")
                .about("Run the gate's deterministic checks on an extracted document")
                .arg(
                    Arg::new("text")
                        .long("text")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Extracted text"),
                )
                .arg(
                    Arg::new("tables")
                        .long("tables")
                        .value_parser(value_parser!(PathBuf))
                        .help("Extracted tables as a JSON array"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("Engine configuration (TOML); supplies the gate policy"),
                ),
        )
        .subcommand(
            Command::new("check-config")
                .about("Validate an engine configuration file")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(args: &ArgMatches) -> Result<EngineConfig> {
    match args.get_one::<PathBuf>("config") {
        Some(path) => {
            EngineConfig::from_file(path).with_context(|| format!("loading config {}", path.display()))
        }
        None => Ok(EngineConfig::default()),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Exit code 1 when any discrepancy exceeds tolerance
fn verify(args: &ArgMatches) -> Result<i32> {
    let config = load_config(args)?;
    let table: RawTable = read_json(args.get_one::<PathBuf>("table").context("--table is required")?)?;
    let formulas: Vec<AnchorFormula> =
        read_json(args.get_one::<PathBuf>("formulas").context("--formulas is required")?)?;
    debug!(table = %table.id, formulas = formulas.len(), "verifying");

    let report = Verifier::new(config.tolerance).verify_table(&table, &formulas);
    let exceeding = report.exceeding().count();
    info!(
        table = %report.table_id,
        evaluated = report.evaluated_count(),
        skipped = report.skipped_count(),
        discrepancies = exceeding,
        rejected = report.rejected.len(),
        "verification finished"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(i32::from(exceeding > 0))
}

/// Exit code 1 when the document would be rejected
fn run_preflight(args: &ArgMatches) -> Result<i32> {
    let config = load_config(args)?;
    let text_path = args.get_one::<PathBuf>("text").context("--text is required")?;
    let text = std::fs::read_to_string(text_path).with_context(|| format!("reading {}", text_path.display()))?;
    let tables: Vec<RawTable> = match args.get_one::<PathBuf>("tables") {
        Some(path) => read_json(path)?,
        None => Vec::new(),
    };

    match preflight(&config.gate, &text, &tables) {
        Ok(()) => {
            println!("accepted");
            Ok(0)
        }
        Err(rejection) => {
            println!("{}", serde_json::to_string_pretty(&rejection)?);
            Ok(1)
        }
    }
}

fn check_config(args: &ArgMatches) -> Result<i32> {
    let config = load_config(args)?;
    println!("{}", config_summary(&config));
    Ok(0)
}

fn config_summary(config: &EngineConfig) -> String {
    format!(
        "ok: {} attempts, {} concurrent calls, {} chains x {} passes, batches of {}",
        config.retry.max_attempts,
        config.provider.max_concurrent_calls,
        config.refinement.chains,
        config.refinement.passes,
        config.fan_out.batch_size,
    )
}

fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json-logs"));

    let code = match matches.subcommand() {
        Some(("verify", args)) => verify(args)?,
        Some(("preflight", args)) => run_preflight(args)?,
        Some(("check-config", args)) => check_config(args)?,
        _ => unreachable!("subcommand_required"),
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn verify_requires_table_and_formulas() {
        assert!(cli().try_get_matches_from(["vouch", "verify", "--table", "t.json"]).is_err());
        assert!(cli()
            .try_get_matches_from(["vouch", "verify", "--table", "t.json", "--formulas", "f.json"])
            .is_ok());
    }

    #[test]
    fn verify_exit_code_tracks_exceeding_discrepancies() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("table.json");
        let formulas = dir.path().join("formulas.json");
        std::fs::write(
            &table,
            r#"{"id":"t","rows":[["","A","B","Total"],["x","1","2","4"]]}"#,
        )
        .unwrap();
        std::fs::write(&formulas, r#"[{"id":"sum","expression":"D = B + C"}]"#).unwrap();

        let matches = cli()
            .try_get_matches_from([
                "vouch",
                "verify",
                "--table",
                table.to_str().unwrap(),
                "--formulas",
                formulas.to_str().unwrap(),
            ])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        assert_eq!(verify(args).unwrap(), 1);
    }
}
