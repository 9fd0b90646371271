//! splitgz - parallel, order-preserving chunked gzip
//!
//! Splits a file into fixed-size portions, compresses each portion on its own
//! worker thread, and stores the results as a partitioned archive: a manifest
//! plus one gzip member per chunk. Decompression reverses the process.

use std::process;
use std::sync::Arc;

#[cfg(test)]
#[macro_use]
mod test_utils;

mod archive;
mod cli;
mod config;
mod error;
mod logger;
mod operations;
mod pipeline;
mod sink;
mod source;
mod transform;
mod utils;


use cli::SplitgzArgs;
use error::SplitgzError;
use logger::{Logger, NullLogger, TracingLogger};
use pipeline::RunReport;
use utils::{format_ratio, format_size};

const VERSION: &str = concat!("splitgz ", env!("CARGO_PKG_VERSION"));

fn main() {
    let result = run();

    match result {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("splitgz: {}", e);
            process::exit(1);
        }
    }
}

fn run() -> Result<i32, SplitgzError> {
    let args = match SplitgzArgs::parse().and_then(|args| {
        if !args.help && !args.version {
            args.validate()?;
        }
        Ok(args)
    }) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("splitgz: {}", e);
            println!();
            print_help();
            return Ok(1);
        }
    };

    if args.version {
        println!("{}", VERSION);
        return Ok(0);
    }

    if args.help {
        print_help();
        return Ok(0);
    }

    logger::init(args.verbosity);

    // validate() guarantees all three are present
    let (Some(action), Some(source), Some(destination)) =
        (args.action, &args.source, &args.destination)
    else {
        return Err(SplitgzError::invalid_argument(
            "Not enough input parameters.",
        ));
    };

    if !args.quiet {
        println!("Input parameters:");
        println!("  action type:  {}", action);
        println!("  source path:  {}", source.display());
        println!("  dest path:    {}", destination.display());
        println!("  portion size: {}", format_size(args.portion_size as u64));
        println!("  workers:      {}", args.workers);
        println!();
    }

    // Quiet runs skip formatting lifecycle messages nobody will see
    let pipeline_logger: Arc<dyn Logger> = if args.quiet {
        Arc::new(NullLogger)
    } else {
        Arc::new(TracingLogger)
    };

    let config = args.pipeline_config();
    let report = operations::run_action(action, source, destination, &config, pipeline_logger)?;

    if !args.quiet {
        print_report(&report);
    }

    Ok(0)
}

fn print_report(report: &RunReport) {
    println!(
        "Finished: {} chunks, {} -> {} ({}) in {:.2}s",
        report.chunks_written,
        format_size(report.bytes_in),
        format_size(report.bytes_out),
        format_ratio(report.bytes_out, report.bytes_in),
        report.elapsed.as_secs_f64()
    );

    if report.index_mismatches > 0 {
        println!(
            "Warning: {} manifest lines declared an index out of order; line order was used",
            report.index_mismatches
        );
    }
}

fn print_help() {
    println!("Usage: splitgz [OPTION]... <compress|decompress> <SOURCE> <DEST> [PORTION_SIZE]");
    println!();
    println!("Compress SOURCE into a partitioned gzip archive at DEST, or restore one.");
    println!("Each portion is compressed on its own thread; output order is preserved.");
    println!();
    println!("Options:");
    println!("  -p, --workers N      Number of worker threads (default: 2x CPUs)");
    println!("  -l, --level N        Compression level 0-9 (default: 6)");
    println!("  -t, --timeout SECS   Give up after SECS seconds (default: 1800)");
    println!("      --strict-manifest  Reject manifests whose indices are out of order");
    println!("      --max-memory SIZE  Warn when queued input exceeds SIZE (default: 1000m)");
    println!("  -q, --quiet          Suppress output");
    println!("  -v, --verbose        Verbose output (repeat for more)");
    println!("  -h, --help           Show this help");
    println!("  -V, --version        Show version");
    println!();
    println!("PORTION_SIZE accepts k, m and g suffixes (default: 1m).");
    println!("Options may also be given in the SPLITGZ environment variable.");
    println!();
    println!("Examples:");
    println!("  splitgz compress big.log big.sgz         Writes big.sgz, big.sgz_0, ...");
    println!("  splitgz decompress big.sgz big.log.out   Rebuilds the original file");
    println!("  splitgz -p8 compress big.log big.sgz 4m  8 workers, 4 MiB portions");
}
