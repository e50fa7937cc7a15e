use xlift::*;

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;

use crate::log::*;

/// Lift binary-analysis facts to C-like ASTs
#[derive(Parser, Debug)]
#[clap(about, version, author)]
enum Args {
    /// Lift every function of a fact file
    Lift {
        /// Path to the fact file
        facts: PathBuf,
        /// Path to output file for the lifted C; printed to stdout if not given
        #[clap(long)]
        output_c: Option<PathBuf>,
        /// Also output the low-level form of each function
        #[clap(long)]
        low_level: bool,
        /// Output the low-to-high instruction provenance of each function as GraphViz `.dot`
        /// files, `<function>.dot` in the given directory
        #[clap(long)]
        debug_output_graphviz: Option<PathBuf>,
        /// Disable terminal logging, including errors
        #[clap(long)]
        debug_disable_terminal_logging: bool,
        /// Block on terminal logging instead of reporting dropped messages when a log file is also
        /// being written
        #[clap(long)]
        debug_forced_blocking_terminal_logging: bool,
        /// Write the log as JSON to this file; only errors are still shown on stderr
        #[clap(long = "--log")]
        log_file: Option<PathBuf>,
        /// Verbosity; repeat for info, debug, trace
        #[clap(short, long, parse(from_occurrences))]
        debug: usize,
        /// Advanced configuration options to tweak the lifting behavior
        #[clap(short = 'Z', long, arg_enum)]
        advanced_config: Vec<lift_config::CommandLineLiftConfig>,
    },
}

fn main() {
    let args = Args::parse();

    match args {
        Args::Lift {
            facts,
            output_c,
            low_level,
            debug_output_graphviz,
            debug_disable_terminal_logging,
            debug_forced_blocking_terminal_logging,
            log_file,
            debug,
            advanced_config,
        } => {
            let settings = log::LogSettings {
                verbosity: debug,
                terminal_disabled: debug_disable_terminal_logging,
                terminal_blocking: debug_forced_blocking_terminal_logging,
                file: log_file,
            };
            let logger = match settings.build() {
                Ok(l) => l,
                Err(e) => {
                    eprintln!("Logging could not be set up: {}", e);
                    std::process::exit(1);
                }
            };
            let _log_guard = slog_scope::set_global_logger(logger);

            lift_config::LiftConfig::initialize(advanced_config);

            let text = match std::fs::read_to_string(&facts) {
                Ok(t) => t,
                Err(e) => {
                    crit!("Fact file could not be read"; "path" => ?facts, "error" => %e);
                    std::process::exit(1);
                }
            };
            let program = match fact_loader::load(&text) {
                Ok(p) => p,
                Err(e) => {
                    crit!("Fact file could not be loaded"; "path" => ?facts, "error" => %e);
                    std::process::exit(1);
                }
            };
            for (name, e) in program.rejected.iter() {
                error!("Function not lifted"; "function" => name, "error" => %e);
            }

            let mut out = String::new();
            let mut failed = program.rejected.len();
            for f in program.functions.iter() {
                let lifted = match lifter::lift_function(&program, f) {
                    Ok(l) => l,
                    Err(e) => {
                        error!("Function not lifted"; "function" => &f.name, "error" => %e);
                        failed += 1;
                        continue;
                    }
                };
                for d in lifted.diagnostics.iter() {
                    info!("Diagnostic"; "function" => &lifted.name, "diagnostic" => %d);
                }
                out += &c_printer::PrintableFunction::new(&lifted).to_string();
                out += "\n";
                if low_level {
                    out += &format!("// low level\n{}\n", c_printer::PrintableFunction::low_level(&lifted));
                }

                if let Some(dir) = &debug_output_graphviz {
                    let path = dir.join(format!("{}.dot", lifted.name));
                    if let Err(e) = std::fs::write(&path, lifted.provenance.generate_dot()) {
                        error!("Could not write provenance graph"; "path" => ?path, "error" => %e);
                    }
                }
            }

            let written = match output_c {
                Some(path) => std::fs::File::create(path).and_then(|mut f| write!(f, "{}", out)),
                None => write!(std::io::stdout(), "{}", out),
            };
            if let Err(e) = written {
                crit!("Output could not be written"; "error" => %e);
                std::process::exit(1);
            }

            info!("Done";
                  "program" => &program.name,
                  "lifted" => program.functions.len() + program.rejected.len() - failed,
                  "failed" => failed);
        }
    }
}
