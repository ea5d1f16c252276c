use ensgrid::{
    assemble::EnsembleAssembler,
    config::{AssemblyConfig, BiasJob, CliArgs, CliCommand, Region},
    data_io::{load_reference, NetCDFReader, NetCDFWriter},
    math::{aggregate_to_period_with, dataset_bias_metrics},
    parallel::build_thread_pool,
    subset::{subset, subset_to_extent},
    temporal::{align_pair, AlignMode},
    time_utils::format_datetime,
    Result,
};
use std::path::Path;
use std::time::Instant;

fn main() {
    let args = match CliArgs::from_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let pool = match build_thread_pool(args.config.num_threads) {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Thread pool error: {}", e);
            std::process::exit(1);
        }
    };

    let result = pool.install(|| match &args.command {
        CliCommand::Info { pattern } => run_info(&args.config, pattern),
        CliCommand::Subset {
            pattern,
            region,
            output,
        } => run_subset(&args.config, pattern, region, output),
        CliCommand::Bias(job) => run_bias(&args.config, job),
    });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run_info(config: &AssemblyConfig, pattern: &str) -> Result<()> {
    let assembler = EnsembleAssembler::netcdf(config.clone())?;
    let paths = assembler.discover_files(pattern)?;

    println!("=== Variables of {} ===", paths[0].display());
    for info in NetCDFReader::new().list_variables(&paths[0])? {
        println!(
            "  {} {:?} {:?} [{}]",
            info.name,
            info.dimensions,
            info.shape,
            info.units.as_deref().unwrap_or("-")
        );
    }

    let dataset = assembler.assemble_paths(&paths)?;
    println!("\n=== Unified ensemble ({} files) ===", paths.len());
    println!("{}", dataset);
    for (alias, canonical) in dataset.grid().aliases() {
        println!("  {} -> {}", alias, canonical);
    }
    Ok(())
}

fn run_subset(config: &AssemblyConfig, pattern: &str, region: &Region, output: &Path) -> Result<()> {
    let start = Instant::now();
    let assembler = EnsembleAssembler::netcdf(config.clone())?;
    let dataset = assembler.assemble(pattern)?;

    let cut = match region {
        Region::Bounds(bounds) => subset(&dataset, bounds)?,
        Region::Reference { path, kind } => {
            let reference = load_reference(path, *kind, None)?;
            subset_to_extent(&dataset, &reference)?
        }
    };

    NetCDFWriter::new(output).write(&cut)?;
    println!("{}", cut);
    println!(
        "Subset written to {} in {:.2}s",
        output.display(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

fn run_bias(config: &AssemblyConfig, job: &BiasJob) -> Result<()> {
    let start = Instant::now();
    let assembler = EnsembleAssembler::netcdf(config.clone())?;
    let ensemble = assembler.assemble(&job.pattern)?;
    let reference = load_reference(&job.reference, job.reference_kind, job.reference_variable.as_deref())?;

    let ensemble = subset_to_extent(&ensemble, &reference)?;
    let mode = match job.window {
        Some((start, end)) => AlignMode::Explicit { start, end },
        None => AlignMode::Intersection,
    };
    let (ensemble, reference) = align_pair(&ensemble, &reference, mode)?;

    let forecast = aggregate_to_period_with(&ensemble, job.period, job.compute_ens_mean, job.reduction);
    let observed = aggregate_to_period_with(&reference, job.period, true, job.reduction);
    let observed = observed.force_match_grid(forecast.grid())?;

    let metrics = dataset_bias_metrics(&forecast, &observed, &job.dims)?;

    println!("=== Bias of '{}' against {} '{}' ===", forecast.variable(), job.reference_kind, observed.dataset().variable());
    if let Some((first, last)) = forecast.time_range() {
        println!(
            "Window: {} .. {} ({} {} periods)",
            format_datetime(&first),
            format_datetime(&last),
            forecast.times().len(),
            job.period
        );
    }
    println!("{}", metrics);
    println!("\nCompleted in {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}
