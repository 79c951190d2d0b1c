//! Command-line runner for CMa programs.
//!
//! Loads a `.cma` file, runs it to completion and prints the live stack.
//!
//! # Usage
//! ```text
//! cma <program.cma> [OPTIONS]
//! ```
//!
//! Setting `CMA_TRACE=1` in the environment has the same effect as `--trace`.
//!
//! # Exit codes
//! - `0`: the program ran off its end normally
//! - `1`: bad arguments or the program could not be loaded
//! - `2`: the machine faulted

use cma::utils::log::{self, Level, SHOW_TIMESTAMP};
use cma::virtual_machine::assembler::assemble_file;
use cma::virtual_machine::errors::VMError;
use cma::virtual_machine::vm::{Machine, MachineStatus};
use cma::{error, info, trace, warn};
use std::env;
use std::process;
use std::sync::atomic::Ordering;

const TRACE_ENV: &str = "CMA_TRACE";

/// Runner settings parsed from the command line.
#[derive(Debug, Default, PartialEq, Eq)]
struct Options {
    input: String,
    trace: bool,
    list: bool,
    quiet: bool,
    timestamps: bool,
}

/// Result of argument parsing.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Run(Options),
    Help,
}

impl Options {
    /// Parses `args` (without the program name).
    ///
    /// `trace_env` is the value of `CMA_TRACE`, if set.
    fn parse(args: &[String], trace_env: Option<&str>) -> Result<Command, String> {
        let mut options = Options {
            trace: matches!(trace_env, Some(v) if v == "1" || v.eq_ignore_ascii_case("true")),
            timestamps: true,
            ..Options::default()
        };
        let mut input: Option<&str> = None;

        for arg in args {
            match arg.as_str() {
                "-h" | "--help" => return Ok(Command::Help),
                "-t" | "--trace" => options.trace = true,
                "-l" | "--list" => options.list = true,
                "-q" | "--quiet" => options.quiet = true,
                "--no-timestamp" => options.timestamps = false,
                other if other.starts_with('-') => {
                    return Err(format!("Unexpected argument: {other}"));
                }
                path => {
                    if input.is_some() {
                        return Err(format!("Unexpected argument: {path}"));
                    }
                    input = Some(path);
                }
            }
        }

        options.input = input.ok_or("Missing program file")?.to_string();
        Ok(Command::Run(options))
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let program_name = args.first().map(String::as_str).unwrap_or("cma");
    let trace_env = env::var(TRACE_ENV).ok();

    let options = match Options::parse(args.get(1..).unwrap_or_default(), trace_env.as_deref()) {
        Ok(Command::Run(options)) => options,
        Ok(Command::Help) => {
            print_usage(program_name);
            process::exit(0);
        }
        Err(message) => {
            eprintln!("{message}\n");
            print_usage(program_name);
            process::exit(1);
        }
    };

    SHOW_TIMESTAMP.store(options.timestamps, Ordering::Relaxed);
    if options.trace {
        log::set_min_level(Level::Trace);
    }

    let program = match assemble_file(&options.input) {
        Ok(program) => program,
        Err(e) => {
            error!("failed to load {}: {e}", options.input);
            process::exit(1);
        }
    };

    if program.is_empty() {
        warn!("{} contains no instructions", options.input);
    }
    if options.list {
        print!("{program}");
    }

    info!(
        "running {} ({} instructions)",
        options.input,
        program.len()
    );

    let mut machine = Machine::new(program);
    let outcome = if options.trace {
        run_traced(&mut machine)
    } else {
        machine.run()
    };

    match outcome {
        Ok(_) => {
            info!("halted after {} steps with sp = {}", machine.steps(), machine.sp());
            if !options.quiet {
                print!("{}", machine.dump_stack());
            }
        }
        Err(e) => {
            error!("fault after {} steps (ip = {}): {e}", machine.steps(), machine.ip());
            if !options.quiet {
                print!("{}", machine.dump_stack());
            }
            process::exit(2);
        }
    }
}

/// Steps the machine to completion, logging each instruction before it runs.
fn run_traced(machine: &mut Machine) -> Result<MachineStatus, VMError> {
    while machine.status() == MachineStatus::Running {
        let ip = machine.ip();
        if let Some(instr) = usize::try_from(ip).ok().and_then(|i| machine.program().get(i)) {
            trace!("{ip:>5}: {:<12} sp = {}", instr.to_string(), machine.sp());
        }
        machine.step()?;
    }
    machine.run()
}

const USAGE: &str = "\
CMa Abstract Machine

USAGE:
    {program} <program.cma> [OPTIONS]

ARGS:
    <program.cma>    CMa source file to run

OPTIONS:
    -t, --trace          Log every instruction before it executes
    -l, --list           Print the program listing before running
    -q, --quiet          Do not print the final stack
        --no-timestamp   Omit timestamps from log lines
    -h, --help           Print this help message

ENVIRONMENT:
    CMA_TRACE=1          Same as --trace

EXAMPLES:
    # Run a program and print its final stack
    {program} factorial.cma

    # Watch every step
    {program} factorial.cma --trace --no-timestamp
";

fn print_usage(program: &str) {
    eprint!("{}", USAGE.replace("{program}", program));
}
