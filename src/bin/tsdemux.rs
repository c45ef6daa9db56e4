//! Command-line entry point (`spec.md` §6).
//!
//! Hand-rolled argument parsing over `std::env::args()`, in the same direct style as the
//! teacher crate's own `examples/dump.rs` (no CLI-parsing crate pulled in for a half-dozen
//! flags) -- generalized from "one positional file argument" to the fuller options surface
//! `spec.md` §6 documents. `-v/-a/-t/-r/-m` from `original_source/main.cpp` are not
//! reproduced: they have no wired-up behavior to ground an implementation on, and `-o`'s
//! required-argument form there (`GetPid(optarg)` with no omission case) is superseded by
//! `spec.md`'s documented "optional value" contract, implemented here as `-o[=PID]`.

use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::process::ExitCode;
use tsdemux::config::{EsOutputMode, ParserConfig, PtsPrintMode, ALL_PIDS};
use tsdemux::sink::{FileEsSink, StdoutReporter};
use tsdemux::Demuxer;

fn usage(program: &str) {
    eprintln!("Usage: {} <infile> [OPTIONS...]", program);
    eprintln!("OPTIONS:");
    eprintln!("  -h, --help              Show this help message");
    eprintln!("  -s, --show-info         Show stream information");
    eprintln!("  -o, --output-pid[=PID]  Extract PID to out_XXXX.es (all PIDs if omitted)");
    eprintln!("  -p, --print-pts[=PID]   Print PTS/DTS (all PIDs if omitted)");
    eprintln!();
    eprintln!(
        "If only <infile> is given, it is equivalent to: {} <infile> -s",
        program
    );
}

fn parse_pid(s: &str) -> Option<u16> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

struct Cli {
    input: String,
    config: ParserConfig,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Cli, String> {
    let program = args.next().unwrap_or_else(|| "tsdemux".to_string());
    let rest: Vec<String> = args.collect();

    if rest.len() == 1 && !rest[0].starts_with('-') {
        return Ok(Cli {
            input: rest.into_iter().next().unwrap(),
            config: ParserConfig::show_stream_info_only(),
        });
    }

    let mut input = None;
    let mut config = ParserConfig::default();
    let mut selected_pids: HashSet<u16> = HashSet::new();
    let mut dump_all = false;

    for arg in rest {
        let (flag, value) = match arg.split_once('=') {
            Some((f, v)) => (f, Some(v)),
            None => (arg.as_str(), None),
        };
        match flag {
            "-h" | "--help" => {
                usage(&program);
                std::process::exit(0);
            }
            "-s" | "--show-info" => config.show_stream_info = true,
            "-o" | "--output-pid" => match value.and_then(parse_pid) {
                Some(pid) if pid != ALL_PIDS => {
                    selected_pids.insert(pid);
                }
                _ => dump_all = true,
            },
            "-p" | "--print-pts" => match value.and_then(parse_pid) {
                Some(pid) if pid != ALL_PIDS => config.pts_print = PtsPrintMode::Specific(pid),
                _ => config.pts_print = PtsPrintMode::All,
            },
            _ if !flag.starts_with('-') && input.is_none() => input = Some(flag.to_string()),
            other => return Err(format!("unrecognized option: {}", other)),
        }
    }

    config.es_output = if dump_all {
        EsOutputMode::DumpAll
    } else if !selected_pids.is_empty() {
        EsOutputMode::Selective(selected_pids)
    } else {
        EsOutputMode::None
    };

    match input {
        Some(input) => Ok(Cli { input, config }),
        None => Err("no input file given".to_string()),
    }
}

fn main() -> ExitCode {
    pretty_env_logger::init();

    let cli = match parse_args(std::env::args()) {
        Ok(cli) => cli,
        Err(msg) => {
            eprintln!("error: {}", msg);
            usage("tsdemux");
            return ExitCode::FAILURE;
        }
    };

    let file = match File::open(&cli.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("error: unable to open {}: {}", cli.input, e);
            return ExitCode::FAILURE;
        }
    };

    let es_sink = match &cli.config.es_output {
        EsOutputMode::None => FileEsSink::none(),
        EsOutputMode::Selective(pids) => FileEsSink::selective(pids.clone()),
        EsOutputMode::DumpAll => FileEsSink::dump_all(),
    };
    let reporter = StdoutReporter::default();
    let mut demuxer = Demuxer::new(cli.config.clone(), es_sink, reporter);
    demuxer.parse(BufReader::new(file));

    if cli.config.show_stream_info {
        demuxer.report();
    }

    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> impl Iterator<Item = String> {
        std::iter::once("tsdemux".to_string()).chain(v.iter().map(|s| s.to_string()))
    }

    #[test]
    fn bare_input_file_enables_show_info_only() {
        let cli = parse_args(args(&["input.ts"])).unwrap();
        assert_eq!(cli.input, "input.ts");
        assert!(cli.config.show_stream_info);
        assert!(matches!(cli.config.es_output, EsOutputMode::None));
    }

    #[test]
    fn output_pid_without_value_dumps_all() {
        let cli = parse_args(args(&["input.ts", "-o"])).unwrap();
        assert!(!cli.config.show_stream_info);
        assert!(matches!(cli.config.es_output, EsOutputMode::DumpAll));
    }

    #[test]
    fn output_pid_with_hex_value_is_selective() {
        let cli = parse_args(args(&["input.ts", "-o=0x100", "-s"])).unwrap();
        assert!(cli.config.show_stream_info);
        match cli.config.es_output {
            EsOutputMode::Selective(pids) => assert!(pids.contains(&0x100)),
            _ => panic!("expected selective output"),
        }
    }

    #[test]
    fn print_pts_without_value_prints_all() {
        let cli = parse_args(args(&["input.ts", "-p"])).unwrap();
        assert_eq!(cli.config.pts_print, PtsPrintMode::All);
    }

    #[test]
    fn print_pts_with_value_is_specific() {
        let cli = parse_args(args(&["input.ts", "-p=256"])).unwrap();
        assert_eq!(cli.config.pts_print, PtsPrintMode::Specific(256));
    }

    #[test]
    fn missing_input_file_is_an_error() {
        assert!(parse_args(args(&["-s"])).is_err());
    }
}
