//! CLI binary for barfit - computes strain and gene fitness tables from
//! pooled-mutant barcode counts

use barfit_rs::{
    output::{write_gene_table, write_strain_table},
    pipeline::run_pipeline,
    tables::{read_count_table, read_gene_table, read_sample_table},
    utils::{ensure_parent_dirs, get_num_cpus, validate_file_readable, Timer},
    validate_config, FitnessConfig, FitnessError, FitnessResult,
};
use clap::Parser;
use env_logger::Env;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "barfit")]
#[command(about = "Gene fitness computation from pooled-mutant barcode sequencing data")]
#[command(long_about = "
barfit computes per-strain and per-gene fitness scores from competitive
pooled-mutant sequencing data. Barcode read counts per condition are compared
against pooled time-zero reference samples:

1. Joins the gene annotation, barcode counts, and sample metadata
2. Filters strains and genes below the reference coverage thresholds
3. Estimates pseudocount-stabilized log2 strain fitness and weighted gene fitness
4. Removes positional bias with a sliding window median and per-scaffold
   density mode centering
5. Estimates the noise model and calls significance with a t-like statistic

Two tab-separated tables are written: one row per strain and sample, and one
row per gene and sample. Output paths ending in .gz are gzip compressed.

Input tables are tab-separated with a header row and may be gzip compressed.
The count table is wide: barcode, scaffold, pos, then one column per sample
filename listed in the metadata table.
")]
struct Args {
    /// Path to the gene annotation table
    #[arg(long, value_name = "FILE")]
    genes: PathBuf,

    /// Path to the barcode count table
    #[arg(long, value_name = "FILE")]
    counts: PathBuf,

    /// Path to the sample metadata table
    #[arg(long, value_name = "FILE")]
    metadata: PathBuf,

    /// Path to the output strain-level fitness table
    #[arg(long, value_name = "FILE")]
    strain_output: PathBuf,

    /// Path to the output gene-level fitness table
    #[arg(long, value_name = "FILE")]
    gene_output: PathBuf,

    /// Minimum summed reference reads per strain and condition
    #[arg(long, default_value = "3")]
    min_strain_n0: f64,

    /// Minimum summed reference reads per gene and condition
    #[arg(long, default_value = "30")]
    min_gene_n0: f64,

    /// |t| threshold for the significance call
    #[arg(long, default_value = "4")]
    t_threshold: f64,

    /// Number of threads to use for parallel processing
    #[arg(long, default_value_t = get_num_cpus())]
    num_threads: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Force overwrite of output files if they exist
    #[arg(short, long)]
    force: bool,
}

fn run() -> FitnessResult<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    log::info!("Starting barfit fitness computation");
    log::info!("Gene table: {:?}", args.genes);
    log::info!("Count table: {:?}", args.counts);
    log::info!("Metadata table: {:?}", args.metadata);
    log::info!("Number of threads: {}", args.num_threads);

    // Validate input files
    validate_file_readable(&args.genes)?;
    validate_file_readable(&args.counts)?;
    validate_file_readable(&args.metadata)?;

    // Check if output files exist and handle accordingly
    for output in [&args.strain_output, &args.gene_output] {
        if output.exists() && !args.force {
            return Err(FitnessError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!(
                    "Output file {:?} already exists. Use --force to overwrite.",
                    output
                ),
            )));
        }
        ensure_parent_dirs(output)?;
    }

    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(args.num_threads)
        .build_global()
    {
        log::warn!("Could not configure the thread pool: {}", e);
    }

    // Create pipeline configuration
    let config = FitnessConfig {
        min_strain_n0: args.min_strain_n0,
        min_gene_n0: args.min_gene_n0,
        t_threshold: args.t_threshold,
        ..FitnessConfig::default()
    };
    validate_config(&config)?;
    log::info!(
        "Configuration: min_strain_n0={}, min_gene_n0={}, t_threshold={}",
        config.min_strain_n0,
        config.min_gene_n0,
        config.t_threshold
    );

    // Step 1: Read input tables
    let _timer = Timer::new("Reading input tables");
    let genes = read_gene_table(&args.genes)?;
    log::info!("Read {} genes from annotation table", genes.len());

    let counts = read_count_table(&args.counts)?;
    log::info!(
        "Read {} barcodes and {} sample columns from count table",
        counts.strains.len(),
        counts.sample_names.len()
    );

    let samples = read_sample_table(&args.metadata)?;
    let reference_count = samples.iter().filter(|s| s.reference).count();
    log::info!(
        "Read {} samples ({} reference) from metadata table",
        samples.len(),
        reference_count
    );

    // Step 2: Run the fitness pipeline
    let _timer = Timer::new("Running fitness pipeline");
    let output = run_pipeline(genes, counts, samples, &config)?;

    log::info!(
        "Join diagnostics: {} of {} barcodes matched a gene ({} intergenic, {} non-central)",
        output.diagnostics.strains_joined,
        output.diagnostics.strains_in,
        output.diagnostics.strains_unmatched,
        output.diagnostics.strains_noncentral
    );

    // Log summary statistics
    let significant_count = output.gene_rows.iter().filter(|r| r.significant).count();
    log::info!("Fitness summary:");
    log::info!("  Strain rows: {}", output.strain_rows.len());
    log::info!("  Gene rows: {}", output.gene_rows.len());
    log::info!(
        "  Significant: {} ({:.1}%)",
        significant_count,
        (significant_count as f64 / output.gene_rows.len().max(1) as f64) * 100.0
    );

    if !output.gene_rows.is_empty() {
        let t_values: Vec<f64> = output.gene_rows.iter().map(|r| r.t).collect();
        let min_t = t_values.iter().copied().fold(f64::INFINITY, f64::min);
        let max_t = t_values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        log::info!("  t range: {:.3} to {:.3}", min_t, max_t);
    }

    // Step 3: Write the output tables
    let _timer = Timer::new("Writing output tables");
    write_strain_table(&output.strain_rows, &args.strain_output)?;
    write_gene_table(&output.gene_rows, &args.gene_output)?;

    log::info!("Analysis completed successfully");
    log::info!("Strain table written to: {:?}", args.strain_output);
    log::info!("Gene table written to: {:?}", args.gene_output);

    Ok(())
}

/// Handle application errors and provide user-friendly messages
fn handle_error(error: FitnessError) -> ! {
    match error {
        FitnessError::FileNotFound(path) => {
            eprintln!("Error: File not found: {}", path);
            eprintln!("Please check that the file exists and is readable.");
        }
        FitnessError::MissingColumn { table, column } => {
            eprintln!("Error: The {} table is missing column '{}'.", table, column);
            eprintln!("Please check the table header against the expected schema.");
        }
        FitnessError::InvalidValue(msg) => {
            eprintln!("Error: Invalid value in an input table: {}", msg);
            eprintln!("Please check that positions and counts are numeric.");
        }
        FitnessError::EmptyDataset(msg) => {
            eprintln!("Error: No data to analyze: {}", msg);
            eprintln!("Check the reference samples and coverage thresholds.");
        }
        FitnessError::UndefinedStatistic(msg) => {
            eprintln!("Error: A statistic could not be computed: {}", msg);
            eprintln!("The data set may be too small or too sparse for analysis.");
        }
        FitnessError::InvalidConfig(msg) => {
            eprintln!("Error: Invalid configuration: {}", msg);
            eprintln!("Please check the threshold parameters.");
        }
        FitnessError::Io(ref e) => {
            eprintln!("Error: I/O error: {}", e);
            eprintln!("Please check file permissions and disk space.");
        }
        FitnessError::Csv(ref e) => {
            eprintln!("Error: Data parsing error: {}", e);
            eprintln!("Please check that the input tables are tab-separated with a header row.");
        }
    }
    std::process::exit(1);
}

fn main() {
    if let Err(e) = run() {
        handle_error(e);
    }
}
