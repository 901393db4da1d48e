//! `hyfix`: run the load-time patcher over class files offline

mod batch;

use anyhow::{bail, Context, Result};
use batch::{class_files, process_file, Report};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use hyfix_classfile::{disasm, ClassFile};
use hyfix_pipeline::{
    DiagnosticsSink, FanoutSink, LoadInterceptor, MemorySink, Outcome, PatchConfig, TracingSink,
    CONFIG_FILE,
};
use hyfix_rules::{builtin_rules, CoordinateKey, CoordinateStore, JsonFileStore, RuleSettings};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("hyfix")
        .version(hyfix_pipeline::VERSION)
        .about("Load-time class patcher for the game server")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Configuration file (defaults to ./config.json)"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Debug logging"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Print a JSON report of diagnostics and counters"),
        )
        .subcommand(Command::new("rules").about("List built-in rules and their targets"))
        .subcommand(
            Command::new("patch")
                .about("Patch one class file")
                .arg(
                    Arg::new("input")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Class file to load"),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .short('o')
                        .value_parser(value_parser!(PathBuf))
                        .help("Where to write the delivered bytes"),
                )
                .arg(
                    Arg::new("name")
                        .long("name")
                        .help("Unit name to load under (default: the name the class declares)"),
                )
                .arg(fail_on_fallback()),
        )
        .subcommand(
            Command::new("patch-dir")
                .about("Patch every class file under a directory")
                .arg(
                    Arg::new("dir")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Class directory root"),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .short('o')
                        .value_parser(value_parser!(PathBuf))
                        .help("Mirror the tree here with delivered bytes"),
                )
                .arg(fail_on_fallback()),
        )
        .subcommand(
            Command::new("inspect")
                .about("Disassemble a class file")
                .arg(
                    Arg::new("input")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Class file to disassemble"),
                ),
        )
        .subcommand(
            Command::new("store")
                .about("Edit the destroyed-structure coordinate store")
                .subcommand_required(true)
                .arg(
                    Arg::new("file")
                        .long("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Store file"),
                )
                .subcommand(Command::new("list").about("Print every entry"))
                .subcommand(Command::new("get").arg(Arg::new("key").required(true)))
                .subcommand(
                    Command::new("put")
                        .arg(Arg::new("key").required(true))
                        .arg(Arg::new("value").required(true)),
                )
                .subcommand(Command::new("delete").arg(Arg::new("key").required(true))),
        )
}

fn fail_on_fallback() -> Arg {
    Arg::new("fail-on-fallback")
        .long("fail-on-fallback")
        .action(ArgAction::SetTrue)
        .help("Exit non-zero if any matched class fell back to its original bytes")
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(matches: &ArgMatches) -> Result<PatchConfig> {
    let path = matches
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
    PatchConfig::load(&path).with_context(|| format!("loading {}", path.display()))
}

/// Interceptor plus the in-memory copy of its diagnostics
struct Session {
    interceptor: LoadInterceptor,
    memory: Arc<MemorySink>,
    json: bool,
}

impl Session {
    fn new(config: &PatchConfig, json: bool) -> Self {
        let memory = Arc::new(MemorySink::new());
        let sinks: Vec<Arc<dyn DiagnosticsSink>> = vec![memory.clone(), Arc::new(TracingSink)];
        let interceptor = LoadInterceptor::from_config(config, Arc::new(FanoutSink::new(sinks)));
        Self {
            interceptor,
            memory,
            json,
        }
    }

    fn finish(&self, fail_on_fallback: bool) -> Result<ExitCode> {
        let stats = self.interceptor.stats();
        if self.json {
            let report = Report {
                version: hyfix_pipeline::VERSION,
                stats,
                records: self.memory.records(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!(
                "{} loaded: {} patched, {} passthrough, {} failed",
                stats.total(),
                stats.patched,
                stats.passthrough,
                stats.failed
            );
        }
        Ok(if fail_on_fallback && stats.failed > 0 {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        })
    }
}

fn main() -> ExitCode {
    let matches = cli().get_matches();
    match run(&matches) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(matches: &ArgMatches) -> Result<ExitCode> {
    let config = load_config(matches)?;
    init_tracing(matches.get_flag("verbose") || config.early.logging.verbose);
    let json = matches.get_flag("json");

    match matches.subcommand() {
        Some(("rules", _)) => list_rules(&config.rules, json),
        Some(("patch", args)) => {
            let session = Session::new(&config, json);
            let input = required_path(args, "input")?;
            let output = args.get_one::<PathBuf>("output");
            let result = match args.get_one::<String>("name") {
                Some(name) => {
                    let bytes = std::fs::read(input)
                        .with_context(|| format!("reading {}", input.display()))?;
                    let delivery = session.interceptor.intercept(name, &bytes);
                    if let Some(output) = output {
                        std::fs::write(output, &delivery.bytes)
                            .with_context(|| format!("writing {}", output.display()))?;
                    }
                    let changed = !delivery.is_original();
                    (delivery.unit, delivery.outcome, changed)
                }
                None => {
                    let r = process_file(&session.interceptor, input, output.map(PathBuf::as_path), None)
                        .with_context(|| format!("patching {}", input.display()))?;
                    (r.unit, r.outcome, r.changed)
                }
            };
            if !json {
                println!("{}: {}{}", result.0, result.1, if result.2 { " (rewritten)" } else { "" });
            }
            session.finish(args.get_flag("fail-on-fallback"))
        }
        Some(("patch-dir", args)) => {
            let session = Session::new(&config, json);
            let root = required_path(args, "dir")?;
            let out_root = args.get_one::<PathBuf>("output");
            let files = class_files(root).with_context(|| format!("scanning {}", root.display()))?;
            for path in &files {
                let output = match out_root {
                    Some(out_root) => Some(out_root.join(path.strip_prefix(root)?)),
                    None => None,
                };
                let result = process_file(&session.interceptor, path, output.as_deref(), Some(root))
                    .with_context(|| format!("patching {}", path.display()))?;
                if result.outcome != Outcome::Passthrough {
                    tracing::info!(unit = %result.unit, outcome = %result.outcome, "processed");
                }
            }
            session.finish(args.get_flag("fail-on-fallback"))
        }
        Some(("inspect", args)) => {
            let input = required_path(args, "input")?;
            let bytes =
                std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
            let class = ClassFile::parse(&bytes)
                .with_context(|| format!("parsing {}", input.display()))?;
            print!("{}", disasm::disassemble(&class)?);
            Ok(ExitCode::SUCCESS)
        }
        Some(("store", args)) => store(args),
        _ => bail!("unknown command"),
    }
}

fn required_path<'a>(args: &'a ArgMatches, id: &str) -> Result<&'a Path> {
    args.get_one::<PathBuf>(id)
        .map(PathBuf::as_path)
        .with_context(|| format!("missing <{id}>"))
}

fn list_rules(settings: &RuleSettings, json: bool) -> Result<ExitCode> {
    let rules = builtin_rules(settings);
    if json {
        let listing: Vec<serde_json::Value> = rules
            .iter()
            .map(|rule| {
                serde_json::json!({
                    "id": rule.id(),
                    "description": rule.description(),
                    "targets": rule.targets().iter().map(ToString::to_string).collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&listing)?);
    } else {
        for rule in &rules {
            let targets: Vec<String> = rule.targets().iter().map(ToString::to_string).collect();
            println!("{:<20} {}", rule.id(), rule.description());
            println!("{:<20} → {}", "", targets.join(", "));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn store(args: &ArgMatches) -> Result<ExitCode> {
    let file = required_path(args, "file")?;
    let store = JsonFileStore::open(file)?;
    let key = |m: &ArgMatches| -> Result<CoordinateKey> {
        let text = m.get_one::<String>("key").context("missing <key>")?;
        Ok(text.parse::<CoordinateKey>()?)
    };

    match args.subcommand() {
        Some(("list", _)) => {
            for (key, value) in store.entries() {
                println!("{key}\t{value}");
            }
        }
        Some(("get", m)) => match store.get(&key(m)?) {
            Some(value) => println!("{value}"),
            None => return Ok(ExitCode::FAILURE),
        },
        Some(("put", m)) => {
            let value = m.get_one::<String>("value").context("missing <value>")?;
            store.put(&key(m)?, value)?;
        }
        Some(("delete", m)) => {
            if store.delete(&key(m)?)?.is_none() {
                return Ok(ExitCode::FAILURE);
            }
        }
        _ => bail!("unknown store command"),
    }
    Ok(ExitCode::SUCCESS)
}
