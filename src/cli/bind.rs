//! JT-021: Command tree built from the registry, and argument binding.
//!
//! Every job is a subcommand path under `run`. Effective parameters become
//! positionals in declaration order, options become `--name`/`-s` flags.
//! Only values given on the command line are bound; everything else is left
//! to env/default resolution in the engine.

use crate::core::error::{Error, Result};
use crate::core::inputs::{effective_options, effective_params, Args, InputResolver, PendingInput};
use crate::core::resolver::Registry;
use crate::core::types::{Job, JobName};
use crate::core::value::{Type, Value};
use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::io::{BufRead, IsTerminal, Write};

/// A parsed `run` invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub job: JobName,
    pub args: Args,
}

/// Build the `run` command tree for `registry`.
pub fn build_command(registry: &Registry) -> Result<Command> {
    let root_job = registry.root().map(|j| j.as_ref().clone()).unwrap_or_default();
    job_command(registry, &root_job, &JobName::root(), Command::new("run"))
}

fn job_command(registry: &Registry, root: &Job, name: &JobName, mut cmd: Command) -> Result<Command> {
    let job = registry.get(&name.to_string()).map(|j| j.as_ref()).unwrap_or(root);
    if let Some(about) = &job.description {
        cmd = cmd.about(about.clone());
    }
    for (i, p) in effective_params(root, job)?.iter().enumerate() {
        let mut arg = Arg::new(p.name.clone())
            .index(i + 1)
            .value_name(p.name.to_uppercase())
            .action(ArgAction::Set);
        if let Some(help) = &p.description {
            arg = arg.help(format!("{} ({})", help, p.ty.ty));
        }
        cmd = cmd.arg(arg);
    }
    for o in effective_options(root, job)? {
        let mut arg = Arg::new(o.name.clone()).long(o.name.clone());
        if let Some(short) = o.short {
            arg = arg.short(short);
        }
        arg = if o.ty.ty == Type::Bool {
            arg.action(ArgAction::SetTrue)
        } else {
            arg.action(ArgAction::Set).value_name(o.ty.ty.to_string())
        };
        if let Some(help) = &o.description {
            arg = arg.help(help.clone());
        }
        cmd = cmd.arg(arg);
    }

    let children: Vec<JobName> = registry
        .jobs()
        .map(|j| j.name.clone())
        .filter(|child| child.segments().len() == name.segments().len() + 1 && child.segments().starts_with(name.segments()))
        .collect();
    if !children.is_empty() {
        cmd = cmd.args_conflicts_with_subcommands(true);
    }
    for child in children {
        let segment = child.segments().last().cloned().unwrap_or_default();
        let sub = job_command(registry, root, &child, Command::new(segment))?;
        cmd = cmd.subcommand(sub);
    }
    Ok(cmd)
}

/// Parse `argv` (job words, parameters, options) against the tree.
///
/// `Ok(None)` means clap already printed help or version.
pub fn parse_invocation(registry: &Registry, argv: &[String]) -> Result<Option<Invocation>> {
    let cmd = build_command(registry)?;
    let matches = match cmd.try_get_matches_from(std::iter::once("run".to_string()).chain(argv.iter().cloned())) {
        Ok(m) => m,
        Err(e) => {
            use clap::error::ErrorKind;
            if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                print!("{}", e.render());
                return Ok(None);
            }
            return Err(Error::Parse {
                location: "command line".to_string(),
                message: e.render().to_string().trim_end().to_string(),
            });
        }
    };

    let mut job = JobName::root();
    let mut leaf = &matches;
    while let Some((segment, sub)) = leaf.subcommand() {
        job = job.child(segment);
        leaf = sub;
    }
    let args = bind_args(registry, &job, leaf)?;
    Ok(Some(Invocation { job, args }))
}

fn bind_args(registry: &Registry, name: &JobName, matches: &ArgMatches) -> Result<Args> {
    let default_root = Job::default();
    let root = registry.root().map(|j| j.as_ref()).unwrap_or(&default_root);
    let job = registry
        .get(&name.to_string())
        .ok_or_else(|| Error::JobNotFound(name.to_string()))?;

    let from_cli = |id: &str| matches.value_source(id) == Some(ValueSource::CommandLine);
    let mut args = Args::new();
    for p in effective_params(root, job)? {
        if !from_cli(&p.name) {
            continue;
        }
        if let Some(raw) = matches.get_one::<String>(&p.name) {
            args.insert(p.name.clone(), typed(name, "parameter", &p.name, raw, &p.ty.ty)?);
        }
    }
    for o in effective_options(root, job)? {
        if !from_cli(&o.name) {
            continue;
        }
        if o.ty.ty == Type::Bool {
            args.insert(o.name.clone(), Value::Bool(matches.get_flag(&o.name)));
        } else if let Some(raw) = matches.get_one::<String>(&o.name) {
            args.insert(o.name.clone(), typed(name, "option", &o.name, raw, &o.ty.ty)?);
        }
    }
    Ok(args)
}

fn typed(job: &JobName, kind: &str, name: &str, raw: &str, ty: &Type) -> Result<Value> {
    Value::parse_raw(raw, ty).map_err(|e| Error::type_mismatch(format!("job '{}': {} '{}'", job, kind, name), e))
}

/// Prompts on the terminal for inputs nothing else supplied.
///
/// Off a terminal it resolves nothing, so missing inputs stay errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct PromptResolver;

impl InputResolver for PromptResolver {
    fn resolve_missing(&self, job: &JobName, pending: &[PendingInput]) -> Result<Args> {
        let stdin = std::io::stdin();
        if !stdin.is_terminal() {
            return Ok(Args::new());
        }
        let mut args = Args::new();
        let mut lines = stdin.lock();
        for input in pending {
            let label = input.description.as_deref().unwrap_or(&input.name);
            eprint!("{} {} ({}): ", job, label, input.ty);
            std::io::stderr().flush().map_err(|e| Error::io("<stderr>", e))?;
            let mut line = String::new();
            lines.read_line(&mut line).map_err(|e| Error::io("<stdin>", e))?;
            let raw = line.trim_end_matches(['\r', '\n']);
            if raw.is_empty() {
                continue;
            }
            args.insert(input.name.clone(), typed(job, input.kind.as_str(), &input.name, raw, &input.ty)?);
        }
        Ok(args)
    }
}
