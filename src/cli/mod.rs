//! JT-020: CLI subcommands: run, jobs, check, test.

pub mod bind;

use crate::core::error::{Error, Result};
use crate::core::executor::{Engine, EngineConfig};
use crate::core::{parser, resolver, testing};
use crate::source::{default_cache_dir, CacheFetcher};
use bind::PromptResolver;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "jobtree",
    version,
    about = "Declarative job trees: typed inputs, scoped expressions, bounded-concurrency runs"
)]
pub struct Cli {
    /// Path to the job document
    #[arg(short, long, global = true, env = "JOBTREE_FILE", default_value = "jobs.yaml")]
    pub file: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a job: <job words...> [params...] [--option value...]
    Run {
        /// Emit every engine event as a JSON trace line
        #[arg(long)]
        trace: bool,

        /// Record commands instead of executing them
        #[arg(long)]
        dry_run: bool,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// List jobs with their descriptions
    Jobs,

    /// Load and validate the document tree
    Check,

    /// Run declared tests in record/verify mode
    Test {
        /// Only the test with this name
        name: Option<String>,
    },
}

impl Commands {
    pub fn trace(&self) -> bool {
        matches!(self, Self::Run { trace: true, .. })
    }
}

/// Dispatch a CLI command.
pub fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            trace,
            dry_run,
            args,
        } => cmd_run(&cli.file, trace, dry_run, &args),
        Commands::Jobs => cmd_jobs(&cli.file),
        Commands::Check => cmd_check(&cli.file),
        Commands::Test { name } => cmd_test(&cli.file, name.as_deref()),
    }
}

/// Load and validate, printing every validation error.
fn load_checked(file: &Path) -> Result<resolver::Registry> {
    let fetcher = CacheFetcher::new(default_cache_dir());
    let registry = resolver::load_registry(file, Some(&fetcher))?;
    let errors = parser::validate_registry(&registry);
    if errors.is_empty() {
        return Ok(registry);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(Error::Parse {
        location: file.display().to_string(),
        message: format!("{} validation error(s)", errors.len()),
    })
}

fn cmd_run(file: &Path, trace: bool, dry_run: bool, argv: &[String]) -> Result<()> {
    let registry = Arc::new(load_checked(file)?);
    let Some(invocation) = bind::parse_invocation(&registry, argv)? else {
        return Ok(());
    };

    let config = EngineConfig {
        trace,
        record_only: dry_run,
        cache_dir: Some(default_cache_dir()),
        ..EngineConfig::default()
    };
    let engine = Engine::from_config(registry.clone(), &config).with_input_resolver(Arc::new(PromptResolver));
    let outcome = engine.invoke(&invocation.job.to_string(), &invocation.args)?;

    if !outcome.handled {
        let mut cmd = bind::build_command(&registry)?;
        for segment in invocation.job.segments() {
            cmd = match cmd.find_subcommand(segment) {
                Some(sub) => sub.clone(),
                None => break,
            };
        }
        print!("{}", cmd.render_help());
        return Ok(());
    }
    if let Some(result) = outcome.result {
        print!("{}", result.stdout);
        eprint!("{}", result.stderr);
    }
    Ok(())
}

fn cmd_jobs(file: &Path) -> Result<()> {
    let registry = load_checked(file)?;
    let width = registry.names().map(str::len).max().unwrap_or(0);
    for job in registry.jobs().filter(|j| !j.name.is_root()) {
        let name = job.name.to_string();
        match &job.description {
            Some(desc) => println!("{:width$}  {}", name, desc, width = width),
            None => println!("{}", name),
        }
    }
    Ok(())
}

fn cmd_check(file: &Path) -> Result<()> {
    let registry = load_checked(file)?;
    let tests = registry.root().map(|r| r.tests.len()).unwrap_or(0);
    println!(
        "OK: {} ({} jobs, {} tests)",
        file.display(),
        registry.len(),
        tests
    );
    Ok(())
}

fn cmd_test(file: &Path, name: Option<&str>) -> Result<()> {
    let registry = Arc::new(load_checked(file)?);
    let reports = testing::run_tests(registry, name)?;
    let total = reports.len();
    let mut first_failure = None;
    for report in reports {
        let label = report.label();
        match report.failure {
            None => println!("  PASS {}", label),
            Some(e) => {
                println!("  FAIL {}: {}", label, e);
                first_failure.get_or_insert(e);
            }
        }
    }
    match first_failure {
        Some(e) => Err(e),
        None => {
            println!("{} test case(s) passed", total);
            Ok(())
        }
    }
}
