//! Publication CLI - Bridge interface for build scripts
//!
//! Commands: compile, inspect, verify
//! Outputs JSON to stdout, logs to stderr
//! Returns non-zero on fatal errors and failed verification

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use publication_core::{
    verify_output, ChecksumPolicy, CompilerConfig, InputInspection, PublicationCompiler,
};

#[derive(Parser)]
#[command(name = "publication-cli")]
#[command(about = "Publication CLI - deterministic ledger publication compiler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON config file (camelCase keys; missing keys take defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Repository root; overrides the config file
    #[arg(short, long, global = true)]
    repo_root: Option<PathBuf>,

    /// Claim identifier; overrides the config file
    #[arg(long, global = true)]
    claim_id: Option<String>,

    /// Treat declared-checksum mismatches as fatal
    #[arg(long, global = true)]
    strict_checksums: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile the ledger into a dated publication bucket
    Compile {
        /// Publication date (YYYY-MM-DD), defaults to today UTC
        #[arg(short, long)]
        date: Option<String>,
    },

    /// Check the input ledger without writing anything
    Inspect,

    /// Recompute and check every digest in a published bucket
    Verify {
        /// Bucket directory (<output>/<claim>/<date>)
        #[arg(short, long)]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Verify { dir } => match verify_output(dir) {
            Ok(report) => {
                print_json(&serde_json::json!({"success": true, "verification": report}));
                if report.verified {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::from(2)
                }
            }
            Err(e) => {
                print_error(&e.to_string());
                ExitCode::from(2)
            }
        },

        Commands::Compile { date } => {
            let compiler = match build_compiler(&cli) {
                Ok(c) => c,
                Err(e) => return fail(&e),
            };
            match compiler.run(date.as_deref()) {
                Ok(report) => {
                    print_json(&serde_json::json!({"success": true, "report": report}));
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    tracing::error!(error = %e, "publication aborted");
                    fail(&e.to_string())
                }
            }
        }

        Commands::Inspect => {
            let compiler = match build_compiler(&cli) {
                Ok(c) => c,
                Err(e) => return fail(&e),
            };
            match compiler.inspect() {
                Ok(InputInspection::Absent { expected }) => {
                    print_json(&serde_json::json!({
                        "success": true,
                        "verified": false,
                        "status": "NO_DATA_YET",
                        "expected_path": expected,
                    }));
                    ExitCode::from(2)
                }
                Ok(InputInspection::Read(result)) => {
                    let verified = result.verified();
                    print_json(&serde_json::json!({
                        "success": true,
                        "verified": verified,
                        "inputs_verified": result.inputs_verified(),
                        "integrity_confirmed": result.integrity_confirmed(),
                        "entries": &result.entries,
                        "missing_files": &result.missing_files,
                        "issues": &result.issues,
                    }));
                    if verified {
                        ExitCode::SUCCESS
                    } else {
                        ExitCode::from(2)
                    }
                }
                Err(e) => fail(&e.to_string()),
            }
        }
    }
}

fn build_compiler(cli: &Cli) -> Result<PublicationCompiler, String> {
    let config = load_config(cli)?;
    PublicationCompiler::new(config).map_err(|e| e.to_string())
}

fn load_config(cli: &Cli) -> Result<CompilerConfig, String> {
    let mut config = match &cli.config {
        Some(path) => CompilerConfig::load(path).map_err(|e| e.to_string())?,
        None => CompilerConfig::new("."),
    };
    if let Some(root) = &cli.repo_root {
        config.repo_root = root.clone();
    }
    if let Some(claim_id) = &cli.claim_id {
        config.claim_id = claim_id.clone();
    }
    if cli.strict_checksums {
        config.checksum_policy = ChecksumPolicy::Fail;
    }
    Ok(config)
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("failed to encode output: {}", e),
    }
}

fn print_error(message: &str) {
    println!("{}", serde_json::json!({"success": false, "error": message}));
}

fn fail(message: &str) -> ExitCode {
    print_error(message);
    ExitCode::FAILURE
}
