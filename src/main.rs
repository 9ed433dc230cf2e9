use std::io::{self, prelude::*};
use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use ts_sort::{check_sorted, CheckOutcome, ExternalSorter, ExternalSorterBuilder, JsonFieldKey};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let key_field = arg_parser.value_of("key").expect("value is defaulted");
    let key_extractor = JsonFieldKey::new(key_field);
    log::debug!("sorting by the '{}' field", key_extractor.field());

    if arg_parser.is_present("check") {
        process::exit(run_check(key_extractor));
    }

    let budget = match arg_parser.value_of("budget") {
        Some(budget) => budget.parse::<ByteSize>().expect("value is pre-validated"),
        None => gib_budget(arg_parser.value_of_t_or_exit("multiplier")).expect("value is pre-validated"),
    };
    let threads: Option<usize> = arg_parser
        .is_present("threads")
        .then(|| arg_parser.value_of_t_or_exit("threads"));
    let scratch_dir = arg_parser.value_of("scratch_dir").expect("value is defaulted");

    let mut sorter_builder = ExternalSorterBuilder::new()
        .with_budget(budget.as_u64())
        .with_scratch_dir(path::Path::new(scratch_dir))
        .with_preallocate(arg_parser.is_present("preallocate"))
        .with_keep_chunks(arg_parser.is_present("keep_chunks"))
        .with_key_extractor(key_extractor);

    if let Some(threads) = threads {
        sorter_builder = sorter_builder.with_threads_number(threads);
    }

    if let Some(quarantine) = arg_parser.value_of("quarantine") {
        sorter_builder = sorter_builder.with_quarantine_path(path::Path::new(quarantine));
    }

    let sorter: ExternalSorter = match sorter_builder.build() {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            process::exit(1);
        }
    };
    log::info!(
        "attempting to use no more than about {} of RAM",
        ByteSize::b(sorter.budget() as u64)
    );

    let stdin = io::stdin();
    let stdout = io::stdout();
    let input_stream = stdin.lock();
    let output_stream = io::BufWriter::new(stdout.lock());

    if let Err(err) = sorter.sort(input_stream, output_stream) {
        log::error!("data sorting error: {}", err);
        process::exit(1);
    }
}

/// Converts a GiB multiplier into a budget. Returns [`None`] if it is zero or does not fit into `u64`.
fn gib_budget(multiplier: u64) -> Option<ByteSize> {
    match multiplier.checked_mul(bytesize::GIB) {
        Some(0) | None => None,
        Some(bytes) => Some(ByteSize::b(bytes)),
    }
}

fn run_check(key_extractor: JsonFieldKey) -> i32 {
    let stdin = io::stdin();

    match check_sorted(stdin.lock(), key_extractor) {
        Ok(CheckOutcome::Sorted { lines, malformed }) => {
            log::info!("checked {} lines ({} malformed)", lines, malformed);
            println!("All sorted!");
            0
        }
        Ok(CheckOutcome::Unsorted { line }) => {
            println!("Unsorted at line {}", line);
            1
        }
        Err(err) => {
            log::error!("input data stream error: {}", err);
            1
        }
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("ts-sort")
        .about("sorts timestamped json lines from stdin to stdout using bounded memory")
        .arg(
            clap::Arg::new("multiplier")
                .help("memory budget in GiB")
                .index(1)
                .takes_value(true)
                .default_value("8")
                .validator(|v| match v.parse::<u64>() {
                    Ok(0) => Err("Memory budget must be positive".to_string()),
                    Ok(v) => match gib_budget(v) {
                        Some(_) => Ok(()),
                        None => Err(format!("Memory budget of {} GiB is too large", v)),
                    },
                    Err(err) => Err(format!("Memory budget format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("budget")
                .short('b')
                .long("budget")
                .help("exact memory budget, e.g. 512MiB; overrides the GiB multiplier")
                .takes_value(true)
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Memory budget format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("scratch_dir")
                .short('d')
                .long("scratch-dir")
                .help("directory to be used to store chunk files")
                .takes_value(true)
                .default_value(ts_sort::sort::DEFAULT_SCRATCH_DIR),
        )
        .arg(
            clap::Arg::new("quarantine")
                .short('q')
                .long("quarantine")
                .help("file malformed lines are appended to [default: <scratch-dir>/malformed.jsonl]")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("key")
                .short('k')
                .long("key")
                .help("name of the field holding the sort key")
                .takes_value(true)
                .default_value(ts_sort::record::DEFAULT_KEY_FIELD),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of threads to use for parallel sorting")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("keep_chunks")
                .long("keep-chunks")
                .help("keep chunk files after a successful run"),
        )
        .arg(
            clap::Arg::new("preallocate")
                .long("preallocate")
                .help("allocate the whole memory budget up front"),
        )
        .arg(
            clap::Arg::new("check")
                .long("check")
                .help("only check whether the input is sorted"),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
