//=====================================================
// File: main.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: MibScript CLI entry point
// Objective: Compile .mi sources into .mib bytecode and invoke script
//            functions from source or bytecode using key=value arguments
//=====================================================

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::{Args as ClapArgs, Parser, Subcommand};
use mibscript::config::Config;
use mibscript::interop::HostBridge;
use mibscript::logging;
use mibscript::pipeline::Pipeline;
use mibscript::vm::{ByteCodeVm, NativeRegistry};
use serde_json::Value as JsonValue;

/// Extension of compiled bytecode images.
const BYTECODE_EXTENSION: &str = "mib";

#[derive(Parser, Debug)]
#[command(name = "mibscript", about = "MibScript compiler and bytecode VM")]
pub struct Args {
    /// Explicit configuration file instead of the mib.toml lookup.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile a .mi source: `compile file=<path> [out=<path>]`.
    Compile(KeyValueArgs),
    /// Invoke a function: `run file=<path> main=<module.function> [args=<json array>]`.
    Run(RunArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct KeyValueArgs {
    #[arg(value_name = "KEY=VALUE", value_parser = parse_pair)]
    pub pairs: Vec<(String, String)>,
}

impl KeyValueArgs {
    fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    fn require(&self, key: &str, usage: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| anyhow!("missing required argument '{key}=...' (usage: {usage})"))
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub options: KeyValueArgs,

    /// Print the parsed AST before execution (sources only).
    #[arg(long = "print-ast")]
    pub print_ast: bool,
}

const COMPILE_USAGE: &str = "mibscript compile file=<path>";
const RUN_USAGE: &str = "mibscript run file=<path> main=<module.function> [args=<json array>]";

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, found '{raw}'")),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    match execute(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn execute(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?.0,
    };
    logging::init("mibscript", &config.log.level);

    match args.command {
        Command::Compile(options) => compile(&config, &options),
        Command::Run(run_args) => run(&config, &run_args),
    }
}

//=====================================================
// Section 1.0 - Commands
//=====================================================

fn compile(config: &Config, options: &KeyValueArgs) -> Result<()> {
    let file = PathBuf::from(options.require("file", COMPILE_USAGE)?);
    let source = read_source(&file)?;
    let bytes = Pipeline::new(config)
        .compile_to_bytes(&source)
        .with_context(|| format!("compiling {}", file.display()))?;

    let output = options
        .get("out")
        .map(PathBuf::from)
        .unwrap_or_else(|| file.with_extension(BYTECODE_EXTENSION));
    fs::write(&output, &bytes).with_context(|| format!("writing {}", output.display()))?;
    tracing::info!(output = %output.display(), bytes = bytes.len(), "wrote bytecode");
    Ok(())
}

fn run(config: &Config, run_args: &RunArgs) -> Result<()> {
    let options = &run_args.options;
    let file = PathBuf::from(options.require("file", RUN_USAGE)?);
    let function = options.require("main", RUN_USAGE)?;
    let arguments = parse_arguments(options.get("args"))?;

    let pipeline = Pipeline::new(config);
    let bytes = if is_bytecode(&file) {
        fs::read(&file).with_context(|| format!("reading {}", file.display()))?
    } else {
        let source = read_source(&file)?;
        if run_args.print_ast {
            let parsed = pipeline
                .parse(&source)
                .with_context(|| format!("parsing {}", file.display()))?;
            println!("{}", parsed.ast.dump());
        }
        pipeline
            .compile_to_bytes(&source)
            .with_context(|| format!("compiling {}", file.display()))?
    };

    let mut vm = ByteCodeVm::new(NativeRegistry::with_builtins(), config.runtime.options());
    vm.load(&bytes)
        .with_context(|| format!("loading {}", file.display()))?;
    let bridge = HostBridge::new(vm);
    let result = bridge
        .invoke_json(function, &arguments)
        .with_context(|| format!("invoking {function}"))?;

    match result {
        JsonValue::Null => {}
        JsonValue::String(text) => println!("{text}"),
        other => println!("{other}"),
    }
    Ok(())
}

//=====================================================
// Section 2.0 - Helpers
//=====================================================

fn is_bytecode(path: &Path) -> bool {
    path.extension()
        .is_some_and(|extension| extension == BYTECODE_EXTENSION)
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn parse_arguments(raw: Option<&str>) -> Result<Vec<JsonValue>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    match serde_json::from_str(raw).context("parsing args as JSON")? {
        JsonValue::Array(values) => Ok(values),
        other => Err(anyhow!("args must be a JSON array, found {other}")),
    }
}

//=====================================================
// End of file
//=====================================================
