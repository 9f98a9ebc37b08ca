use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::error;

use testgraft::{
    commands::{run_tests, submit_artifact},
    config::Config,
    error::{Error, ErrorKind},
    logger,
    testgen::{
        extract::extract_detailed,
        runner::{PytestRunner, TestRunRequest},
        test_suite,
    },
    workspace::Workspace,
};

#[derive(Parser)]
#[command(
    name = "testgraft",
    version,
    about = "Graft model-generated tests into a repository and run them with pytest."
)]
struct Cli {
    #[arg(long, global = true, help = "Repository working copy (or set TESTGRAFT_REPO)")]
    repo: Option<PathBuf>,

    #[arg(long, global = true, help = "Config file (default: <config dir>/testgraft/config.toml)")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Debug logging on stderr")]
    verbose: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Clone a repository into the workspace
    Init {
        repo_url: String,
    },
    /// Print a workspace file
    Show {
        file: String,
    },
    /// List workspace files
    List {
        #[arg(long, help = "Only files with this extension, e.g. py")]
        ext: Option<String>,
    },
    /// Extract the tagged payload from model output and print it
    Extract(InputArgs),
    /// Extract the tagged test from model output and merge it into FILE
    Submit {
        file: String,
        #[command(flatten)]
        input: InputArgs,
    },
    /// Run a test file (or selected tests) and print parsed results
    Run(RunArgs),
    /// Parse a saved runner report
    Parse {
        #[arg(help = "Report file, or - for stdin")]
        input: Option<PathBuf>,
    },
}

#[derive(Args)]
struct InputArgs {
    #[arg(long, help = "Payload tag name (default from config: output)")]
    tag: Option<String>,

    #[arg(help = "File with the model output, or - for stdin")]
    input: Option<PathBuf>,
}

#[derive(Args)]
struct RunArgs {
    file: String,

    #[arg(long, help = "Directory the file lives in, relative to the workspace")]
    path: Option<String>,

    #[arg(long = "test", value_delimiter = ',', help = "Test name to run; repeatable")]
    tests: Vec<String>,

    #[arg(long, help = "Also write a markdown report to this file")]
    report: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logger::init(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => report_error(&e),
    }
}

fn run(cli: Cli) -> Result<ExitCode, Error> {
    let cfg = Config::load(cli.config.as_deref())?;
    let ws = Workspace::new(cfg.resolve_repo_root(cli.repo.as_deref()));

    match cli.command {
        CliCommand::Init { repo_url } => {
            ws.clone_repo(&repo_url)?;
            print_json(&json!({ "repo": repo_url, "root": ws.root() }));
        }

        CliCommand::Show { file } => {
            let path = ws.resolve_existing(&file)?;
            print!("{}", fs::read_to_string(path)?);
        }

        CliCommand::List { ext } => {
            let ext = ext.as_deref().map(|e| e.trim_start_matches('.'));
            print_json(&ws.list(ext));
        }

        CliCommand::Extract(args) => {
            let raw = read_input(args.input.as_deref())?;
            let tag = args.tag.unwrap_or(cfg.tag);
            print_json(&extract_detailed(&raw, &tag)?);
        }

        CliCommand::Submit { file, input } => {
            let raw = read_input(input.input.as_deref())?;
            let tag = input.tag.unwrap_or(cfg.tag);
            print_json(&submit_artifact(&ws, &file, &raw, &tag)?);
        }

        CliCommand::Run(args) => {
            let runner = PytestRunner::from_config(&cfg.runner);
            let req = TestRunRequest {
                file_path: args.path,
                file_name: args.file,
                test_names: args.tests,
            };

            let run = run_tests(&ws, &runner, &req)?;
            if let Some(report) = &args.report {
                test_suite::write_report(report, &run)?;
            }
            print_json(&run);

            if !run.success {
                return Ok(ExitCode::FAILURE);
            }
        }

        CliCommand::Parse { input } => {
            let report = read_input(input.as_deref())?;
            print_json(&json!({
                "results": test_suite::parse_all(&report),
                "summary": test_suite::summarize(&report),
            }));
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn read_input(path: Option<&Path>) -> io::Result<String> {
    match path {
        Some(p) if p != Path::new("-") => fs::read_to_string(p),
        _ => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => error!(error = %e, "failed to serialize output"),
    }
}

fn report_error(e: &Error) -> ExitCode {
    let kind = e.kind();
    error!(kind = ?kind, "{e}");

    let mut body = json!({ "error": e.to_string(), "kind": kind });
    if let Error::RunnerLaunch { stdout, stderr, .. } = e {
        body["stdout"] = json!(stdout);
        body["stderr"] = json!(stderr);
    }
    print_json(&body);

    match kind {
        ErrorKind::ClientInput => ExitCode::from(2),
        ErrorKind::NotFound => ExitCode::from(3),
        ErrorKind::Internal => ExitCode::FAILURE,
    }
}
