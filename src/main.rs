//! Command-line front end for the TLV parsing engine.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tlve::{rcfile, Engine};

/// Parse tag-length-value structures and print them in configurable formats.
#[derive(Parser, Debug)]
#[command(name = "tlve", version, about, long_about = None)]
struct Args {
    /// Read the configuration from FILE instead of ~/.tlverc
    #[arg(short = 'c', long = "configuration", value_name = "FILE")]
    configuration: Option<PathBuf>,

    /// Use structure NAME to process the input data
    #[arg(short = 's', long = "structure", value_name = "NAME", default_value = "default")]
    structure: String,

    /// Use printing definition NAME to print the data
    #[arg(short = 'p', long = "print", value_name = "NAME")]
    print: Option<String>,

    /// Send output to FILE instead of standard output ('-' is standard output)
    #[arg(short = 'o', long = "output", value_name = "FILE", default_value = "-")]
    output: String,

    /// Print only elements having a name or tag in the comma-separated LIST
    #[arg(short = 'n', long = "name-list", value_name = "LIST")]
    names: Vec<String>,

    /// Print only blocks for which the expression NAME=REGEX evaluates true
    #[arg(short = 'e', long = "expression", value_name = "NAME=REGEX")]
    expressions: Vec<String>,

    /// All expressions must evaluate true
    #[arg(short = 'a', long = "and")]
    and: bool,

    /// First level in the element hierarchy to be printed
    #[arg(short = 'l', long = "start-level", value_name = "LEVEL")]
    start_level: Option<usize>,

    /// Last level in the element hierarchy to be printed
    #[arg(short = 'L', long = "stop-level", value_name = "LEVEL")]
    stop_level: Option<usize>,

    /// Dump unprocessable data to tlve.debug on a parse failure
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Input files; '-' or none reads standard input
    #[arg(value_name = "FILE")]
    files: Vec<String>,
}

fn run(args: Args) -> anyhow::Result<()> {
    let config_path = args.configuration.clone().unwrap_or_else(rcfile::default_rc_path);
    let defs = rcfile::load_file(&config_path, &args.structure, args.print.as_deref())
        .with_context(|| format!("cannot load configuration '{}'", config_path.display()))?;

    let out: Box<dyn Write> = if args.output == "-" {
        Box::new(io::stdout())
    } else {
        Box::new(
            File::create(&args.output).with_context(|| format!("cannot open output file '{}'", args.output))?,
        )
    };

    let mut engine = Engine::new(defs, out);
    engine.set_debug(args.debug);
    engine.set_open_command(std::env::var("TLVEOPEN").ok());

    for names in &args.names {
        engine.add_names(names);
    }
    for expression in &args.expressions {
        engine.add_expression(expression)?;
    }
    engine.set_expression_and(args.and);
    if let Some(level) = args.start_level {
        engine.set_start_level(level)?;
    }
    if let Some(level) = args.stop_level {
        engine.set_stop_level(level)?;
    }
    engine.check_names()?;

    if args.files.is_empty() {
        engine.add_input("-");
    } else {
        for file in &args.files {
            engine.add_input(file);
        }
    }

    engine.run()?;
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("tlve: {:#}", error);
            ExitCode::FAILURE
        }
    }
}
