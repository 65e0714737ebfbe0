//! Load Thrift IDL files and report every diagnostic.
//!
//! Usage:
//!   thrift_check [OPTIONS] FILE.thrift ...
//!
//! Options:
//!   -I DIR       Add DIR to the include search path (repeatable)
//!   --dump       Print the loaded schema as IDL
//!   --quiet, -q  Only print errors, not warnings
//!
//! Exits with status 1 if any file fails to load. Set `RUST_LOG=debug` for a
//! trace of the load on stderr.

use std::path::PathBuf;
use thrift_schema::{dump, Level, LoadError, Loader, Report};
use tracing_subscriber::EnvFilter;

struct Args {
    include_paths: Vec<PathBuf>,
    files: Vec<PathBuf>,
    dump: bool,
    quiet: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        include_paths: Vec::new(),
        files: Vec::new(),
        dump: false,
        quiet: false,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-I" => {
                let dir = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("-I requires a directory"))?;
                args.include_paths.push(dir.into());
            }
            "--dump" => args.dump = true,
            "--quiet" | "-q" => args.quiet = true,
            other if other.starts_with("-I") => args.include_paths.push(other[2..].into()),
            other if other.starts_with('-') => anyhow::bail!("unknown option: {}", other),
            _ => args.files.push(arg.into()),
        }
    }
    if args.files.is_empty() {
        anyhow::bail!("usage: thrift_check [-I DIR]... [--dump] [--quiet] FILE.thrift...");
    }
    Ok(args)
}

fn print_reports(reports: &[Report], quiet: bool) {
    for report in reports {
        if quiet && report.level == Level::Warning {
            continue;
        }
        println!("{}: {}", report.level, report);
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    let loader = args
        .include_paths
        .iter()
        .fold(Loader::new(), |l, dir| l.add_include_path(dir.clone()));
    let loader = args
        .files
        .iter()
        .fold(loader, |l, file| l.add_thrift_file(file.clone()));

    match loader.load_with_warnings() {
        Ok((schema, warnings)) => {
            print_reports(&warnings, args.quiet);
            if args.dump {
                print!("{}", dump::render_schema(&schema));
            }
            eprintln!(
                "thrift_check: {} program(s), {} warning(s)",
                schema.programs().len(),
                warnings.len()
            );
            Ok(())
        }
        Err(LoadError::Failed { reports }) => {
            print_reports(&reports, args.quiet);
            let errors = reports.iter().filter(|r| r.level == Level::Error).count();
            eprintln!("thrift_check: {} error(s)", errors);
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}
