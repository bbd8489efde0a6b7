//! Label Maker CLI
//!
//! Searches JSON event data for label windows and transforms saved label tables.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use label_maker::{
    config::SearchConfig,
    core::{parse_duration, Aggregation, LabelFn, LabelMaker, LabelTimes},
    create_shared_progress,
    data::load_records,
    BinOptions, Bins, Comparison, SampleOptions, SampleSize, WindowSize, VERSION,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "label-maker")]
#[command(version = VERSION)]
#[command(about = "Sliding-window label search over event data", long_about = None)]
struct Cli {
    /// Log progress at info level (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search records for label windows
    Search(SearchArgs),

    /// Print the label distribution, settings and transforms of a table
    Describe {
        /// Directory of a saved label table
        labels: PathBuf,

        /// Also print cumulative counts by cutoff time
        #[arg(long)]
        by_time: bool,
    },

    /// Turn numeric labels into booleans
    Threshold {
        #[command(flatten)]
        io: TableIo,

        /// Threshold value
        #[arg(long)]
        value: f64,

        /// Comparison: >, >=, <, <=, ==
        #[arg(long, default_value = ">")]
        comparison: Comparison,
    },

    /// Shift cutoff times earlier
    Lead {
        #[command(flatten)]
        io: TableIo,

        /// Lead time, e.g. 1h or 2d
        #[arg(long)]
        value: String,
    },

    /// Bin numeric labels into intervals
    Bin {
        #[command(flatten)]
        io: TableIo,

        /// Number of bins, or comma-separated edges
        #[arg(long)]
        bins: String,

        /// Use quantile bins
        #[arg(long)]
        quantiles: bool,

        /// Comma-separated bin names, one per bin
        #[arg(long)]
        names: Option<String>,

        /// Close intervals on the left instead of the right
        #[arg(long)]
        left: bool,

        /// Decimal places in interval labels
        #[arg(long, default_value = "3")]
        precision: usize,
    },

    /// Draw a random subset of labels
    Sample {
        #[command(flatten)]
        io: TableIo,

        /// Number of rows
        #[arg(long, conflicts_with_all = ["frac", "per_label"])]
        n: Option<usize>,

        /// Fraction of rows
        #[arg(long, conflicts_with = "per_label")]
        frac: Option<f64>,

        /// Rows per label value, e.g. true=2,false=1
        #[arg(long)]
        per_label: Option<String>,

        /// Seed for reproducible samples
        #[arg(long)]
        random_state: Option<u64>,

        /// Sample with replacement
        #[arg(long)]
        replace: bool,
    },

    /// Show or initialise the search configuration
    Config {
        /// Write the default configuration if no file exists
        #[arg(long)]
        init: bool,
    },
}

#[derive(Args)]
struct SearchArgs {
    /// JSON or JSON Lines file of records
    input: PathBuf,

    /// Configuration file (default: the user config file)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Entity key field
    #[arg(long)]
    target: Option<String>,

    /// Timestamp field
    #[arg(long)]
    time_index: Option<String>,

    /// Window size, a duration such as 1h or a row count
    #[arg(long)]
    window: Option<WindowSize>,

    /// Step between cutoffs
    #[arg(long)]
    gap: Option<WindowSize>,

    /// Offset from the first record, or a timestamp
    #[arg(long)]
    minimum_data: Option<String>,

    /// Offset from the first cutoff, or a timestamp
    #[arg(long)]
    maximum_data: Option<String>,

    /// Labels per entity, -1 for no limit
    #[arg(long, allow_hyphen_values = true)]
    examples: Option<i64>,

    /// Keep windows without records
    #[arg(long)]
    keep_empty: bool,

    /// Name of the label column
    #[arg(long)]
    label_name: Option<String>,

    /// Time zone for timestamps without an offset
    #[arg(long)]
    timezone: Option<String>,

    /// Labeling functions: count, sum:<field>, mean:<field>, min:<field>,
    /// max:<field>, first:<field>, last:<field>, nunique:<field>
    #[arg(long = "aggregate", short, default_value = "count")]
    aggregations: Vec<Aggregation>,

    /// Save the label table to this directory
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct TableIo {
    /// Directory of a saved label table
    labels: PathBuf,

    /// Directory to save the result (default: print it)
    #[arg(long, short)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Search(args) => cmd_search(args, cli.verbose),
        Commands::Describe { labels, by_time } => cmd_describe(&labels, by_time),
        Commands::Threshold {
            io,
            value,
            comparison,
        } => {
            let labels = load_table(&io.labels)?;
            emit(&labels.threshold_with(value, comparison)?, io.output.as_deref())
        }
        Commands::Lead { io, value } => {
            let labels = load_table(&io.labels)?;
            let lead = parse_duration(&value)?;
            emit(&labels.apply_lead(lead)?, io.output.as_deref())
        }
        Commands::Bin {
            io,
            bins,
            quantiles,
            names,
            left,
            precision,
        } => {
            let labels = load_table(&io.labels)?;
            let options = BinOptions {
                quantiles,
                labels: names.map(|n| split_list(&n)),
                right: !left,
                precision,
            };
            emit(&labels.bin(parse_bins(&bins)?, options)?, io.output.as_deref())
        }
        Commands::Sample {
            io,
            n,
            frac,
            per_label,
            random_state,
            replace,
        } => {
            let labels = load_table(&io.labels)?;
            let size = match (n, frac, per_label) {
                (Some(n), _, _) => SampleSize::N(n),
                (None, Some(frac), _) => SampleSize::Frac(frac),
                (None, None, Some(pairs)) => SampleSize::PerLabelN(parse_per_label(&pairs)?),
                (None, None, None) => bail!("one of --n, --frac or --per-label is required"),
            };
            let options = SampleOptions {
                size,
                random_state,
                replace,
            };
            emit(&labels.sample(options)?, io.output.as_deref())
        }
        Commands::Config { init } => cmd_config(init),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "label_maker=info" } else { "label_maker=warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn cmd_search(args: SearchArgs, verbose: bool) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => SearchConfig::load_from(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SearchConfig::load().context("loading default config")?,
    };

    // Flags override the file
    if let Some(target) = args.target {
        config.target_dataframe_name = target;
    }
    if let Some(time_index) = args.time_index {
        config.time_index = time_index;
    }
    if let Some(window) = args.window {
        config.window_size = window;
    }
    if args.gap.is_some() {
        config.gap = args.gap;
    }
    if args.minimum_data.is_some() {
        config.minimum_data = args.minimum_data;
        config.minimum_data_per_entity.clear();
    }
    if args.maximum_data.is_some() {
        config.maximum_data = args.maximum_data;
    }
    if let Some(examples) = args.examples {
        config.num_examples_per_instance = examples;
    }
    if args.keep_empty {
        config.drop_empty = false;
    }
    if args.label_name.is_some() {
        config.label_name = args.label_name;
    }
    if let Some(timezone) = args.timezone {
        config.timezone = timezone;
    }

    let records = load_records(&args.input, &config.load_options()?)
        .with_context(|| format!("reading records from {}", args.input.display()))?;

    let mut functions = args.aggregations.into_iter().map(Aggregation::into_label_fn);
    let Some(first) = functions.next() else {
        bail!("at least one --aggregate is required");
    };
    let mut lm = LabelMaker::new(
        config.target_dataframe_name.clone(),
        config.time_index.clone(),
        first,
        config.window_size,
    );
    lm = functions.fold(lm, |lm, f: LabelFn| lm.with_function(f));
    if let Some(name) = &config.label_name {
        lm = lm.with_label_name(name.clone());
    }

    let progress = create_shared_progress();
    let mut options = config.to_options()?;
    options.verbose = verbose;
    options.progress = Some(progress.clone());

    let labels = lm.search(&records, &options).context("label search failed")?;
    tracing::debug!("{}", progress.summary());
    emit(&labels, args.output.as_deref())
}

fn cmd_describe(dir: &Path, by_time: bool) -> Result<()> {
    let labels = load_table(dir)?;
    println!("{}", labels.describe());

    if by_time {
        println!("Counts by Time");
        println!("--------------");
        for entry in labels.count_by_time() {
            let counts: Vec<String> = entry
                .counts
                .iter()
                .map(|(label, n)| format!("{label}={n}"))
                .collect();
            println!(
                "{}  {}",
                entry.cutoff_time.format("%Y-%m-%d %H:%M:%S"),
                counts.join(" ")
            );
        }
    }
    Ok(())
}

fn cmd_config(init: bool) -> Result<()> {
    let path = SearchConfig::config_path();
    let config = SearchConfig::load().context("loading config")?;

    if init && !path.exists() {
        config.save().context("writing default config")?;
        println!("Wrote default configuration to {}", path.display());
    }

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {}", path.display());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn load_table(dir: &Path) -> Result<LabelTimes> {
    LabelTimes::load(dir).with_context(|| format!("loading label table from {}", dir.display()))
}

/// Save to `output`, or print the table as JSON.
fn emit(labels: &LabelTimes, output: Option<&Path>) -> Result<()> {
    match output {
        Some(dir) => {
            labels
                .save(dir)
                .with_context(|| format!("saving label table to {}", dir.display()))?;
            println!("Saved {} labels to {}", labels.len(), dir.display());
        }
        None => println!("{}", labels.to_json()?),
    }
    Ok(())
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',').map(|p| p.trim().to_string()).collect()
}

fn parse_bins(s: &str) -> Result<Bins> {
    if let Ok(n) = s.trim().parse::<usize>() {
        return Ok(Bins::Count(n));
    }
    let edges = split_list(s)
        .iter()
        .map(|p| p.parse::<f64>().with_context(|| format!("invalid bin edge '{p}'")))
        .collect::<Result<Vec<_>>>()?;
    Ok(Bins::Edges(edges))
}

fn parse_per_label(s: &str) -> Result<BTreeMap<String, usize>> {
    split_list(s)
        .iter()
        .map(|pair| {
            let (label, n) = pair
                .split_once('=')
                .with_context(|| format!("expected label=count, got '{pair}'"))?;
            let n = n
                .trim()
                .parse::<usize>()
                .with_context(|| format!("invalid count in '{pair}'"))?;
            Ok((label.trim().to_string(), n))
        })
        .collect()
}
