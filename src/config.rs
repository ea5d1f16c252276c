use crate::data_io::DatasetKind;
use crate::dataset::Dim;
use crate::error::{EnsembleError, Result};
use crate::grid::{SpatialBounds, DEFAULT_LAT_NAMES, DEFAULT_LON_NAMES};
use crate::lazy::Reduction;
use crate::member::{MemberOrder, MemberParser};
use crate::time_utils::{parse_datetime, Period};
use chrono::{DateTime, Utc};
use clap::{Arg, ArgAction, ArgMatches, Command};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Settings of one assembly run
///
/// Passed explicitly into the assembler so that assembly never depends on
/// process-wide state. Loadable from TOML; every field has a default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssemblyConfig {
    /// Data variable; auto-detected when absent
    pub variable: Option<String>,
    /// Regex with one capture group extracting the member token from a file name
    pub member_pattern: Option<String>,
    pub member_order: MemberOrder,
    /// Split each file into chunks of at most this many time steps
    pub time_steps_per_chunk: Option<usize>,
    /// Reject members spread over several files
    pub one_file_per_member: bool,
    pub lat_names: Vec<String>,
    pub lon_names: Vec<String>,
    /// Size of the compute pool; rayon's default when absent
    pub num_threads: Option<usize>,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            variable: None,
            member_pattern: None,
            member_order: MemberOrder::Numeric,
            time_steps_per_chunk: None,
            one_file_per_member: false,
            lat_names: DEFAULT_LAT_NAMES.iter().map(|s| s.to_string()).collect(),
            lon_names: DEFAULT_LON_NAMES.iter().map(|s| s.to_string()).collect(),
            num_threads: None,
        }
    }
}

impl AssemblyConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| EnsembleError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
            .map_err(|e| EnsembleError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parser for the configured member convention
    pub fn member_parser(&self) -> Result<MemberParser> {
        match &self.member_pattern {
            Some(pattern) => MemberParser::with_pattern(pattern),
            None => Ok(MemberParser::default()),
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.time_steps_per_chunk == Some(0) {
            return Err(EnsembleError::Config(
                "time_steps_per_chunk must be positive".to_string(),
            ));
        }
        if self.num_threads == Some(0) {
            return Err(EnsembleError::Config("num_threads must be positive".to_string()));
        }
        if self.lat_names.is_empty() || self.lon_names.is_empty() {
            return Err(EnsembleError::Config(
                "lat_names and lon_names need at least one candidate".to_string(),
            ));
        }
        if matches!(&self.variable, Some(name) if name.trim().is_empty()) {
            return Err(EnsembleError::Config("variable name is empty".to_string()));
        }
        self.member_parser()?;
        Ok(())
    }

    /// Apply command line overrides on top of file or default settings
    fn apply_matches(&mut self, matches: &ArgMatches) -> Result<()> {
        if let Some(variable) = matches.get_one::<String>("variable") {
            self.variable = Some(variable.clone());
        }
        if let Some(pattern) = matches.get_one::<String>("member-pattern") {
            self.member_pattern = Some(pattern.clone());
        }
        if let Some(order) = matches.get_one::<String>("member-order") {
            self.member_order = match order.as_str() {
                "numeric" => MemberOrder::Numeric,
                "lexical" => MemberOrder::Lexical,
                other => return Err(EnsembleError::Config(format!("invalid member order '{}'", other))),
            };
        }
        if let Some(steps) = matches.get_one::<String>("chunk-steps") {
            self.time_steps_per_chunk = Some(parse_number(steps, "chunk-steps")?);
        }
        if let Some(threads) = matches.get_one::<String>("num-threads") {
            self.num_threads = Some(parse_number(threads, "num-threads")?);
        }
        if matches.get_flag("one-file-per-member") {
            self.one_file_per_member = true;
        }
        if let Some(names) = matches.get_one::<String>("lat-names") {
            self.lat_names = split_list(names);
        }
        if let Some(names) = matches.get_one::<String>("lon-names") {
            self.lon_names = split_list(names);
        }
        Ok(())
    }
}

/// Subcommand selected on the command line
#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    /// Assemble and print a summary
    Info { pattern: String },
    /// Assemble, subset and write NetCDF
    Subset {
        pattern: String,
        region: Region,
        output: PathBuf,
    },
    /// Assemble, align with a reference and print bias metrics
    Bias(BiasJob),
}

/// Region of a subset request
#[derive(Debug, Clone, PartialEq)]
pub enum Region {
    Bounds(SpatialBounds),
    /// Extent of a reference dataset
    Reference { path: PathBuf, kind: DatasetKind },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BiasJob {
    pub pattern: String,
    pub reference: PathBuf,
    pub reference_kind: DatasetKind,
    pub reference_variable: Option<String>,
    pub period: Period,
    pub reduction: Reduction,
    pub compute_ens_mean: bool,
    /// Explicit window; the common time range when absent
    pub window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub dims: Vec<Dim>,
}

/// Parsed command line
#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    pub config: AssemblyConfig,
    pub command: CliCommand,
    pub verbose: bool,
}

impl CliArgs {
    /// Parse configuration from command line arguments
    ///
    /// Usage errors and `--help` are handled by clap, which exits the process.
    pub fn from_args() -> Result<Self> {
        let matches = build_cli().get_matches();
        Self::from_matches(&matches)
    }

    /// Parse an explicit argument list, program name first
    pub fn try_from_args<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = build_cli()
            .try_get_matches_from(args)
            .map_err(|e| EnsembleError::Config(e.to_string()))?;
        Self::from_matches(&matches)
    }

    fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let verbose = matches.get_flag("verbose");
        let (name, sub) = matches
            .subcommand()
            .ok_or_else(|| EnsembleError::Config("missing subcommand".to_string()))?;

        let mut config = match sub.get_one::<String>("config") {
            Some(path) => AssemblyConfig::from_file(Path::new(path))?,
            None => AssemblyConfig::default(),
        };
        config.apply_matches(sub)?;
        config.validate()?;

        let pattern = required(sub, "pattern")?;
        let command = match name {
            "info" => CliCommand::Info { pattern },
            "subset" => {
                let kind = parse_kind(sub)?;
                let region = match (sub.get_one::<String>("bbox"), sub.get_one::<String>("reference")) {
                    (Some(bbox), None) => Region::Bounds(parse_bbox(bbox)?),
                    (None, Some(path)) => Region::Reference {
                        path: PathBuf::from(path),
                        kind,
                    },
                    _ => {
                        return Err(EnsembleError::Config(
                            "subset needs exactly one of --bbox or --reference".to_string(),
                        ))
                    }
                };
                CliCommand::Subset {
                    pattern,
                    region,
                    output: PathBuf::from(required(sub, "output")?),
                }
            }
            "bias" => {
                let window = match (sub.get_one::<String>("start"), sub.get_one::<String>("end")) {
                    (Some(start), Some(end)) => Some((parse_datetime(start)?, parse_datetime(end)?)),
                    (None, None) => None,
                    _ => {
                        return Err(EnsembleError::Config(
                            "--start and --end must be given together".to_string(),
                        ))
                    }
                };
                let reduction = match required(sub, "reduction")?.as_str() {
                    "sum" => Reduction::Sum,
                    _ => Reduction::Mean,
                };
                let dims = split_list(&required(sub, "dims")?)
                    .iter()
                    .map(|d| d.parse())
                    .collect::<Result<Vec<Dim>>>()?;
                CliCommand::Bias(BiasJob {
                    pattern,
                    reference: PathBuf::from(required(sub, "reference")?),
                    reference_kind: parse_kind(sub)?,
                    reference_variable: sub.get_one::<String>("reference-variable").cloned(),
                    period: required(sub, "period")?.parse()?,
                    reduction,
                    compute_ens_mean: !sub.get_flag("per-member"),
                    window,
                    dims,
                })
            }
            other => return Err(EnsembleError::Config(format!("unknown subcommand '{}'", other))),
        };

        Ok(Self {
            config,
            command,
            verbose,
        })
    }
}

/// Arguments shared by every subcommand: the file pattern and assembly overrides
fn assembly_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("pattern")
                .value_name("PATTERN")
                .help("Glob pattern matching the ensemble member files")
                .required(true),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML file with assembly settings"),
        )
        .arg(
            Arg::new("variable")
                .long("variable")
                .value_name("NAME")
                .help("Data variable to read (auto-detected when omitted)"),
        )
        .arg(
            Arg::new("member-pattern")
                .long("member-pattern")
                .value_name("REGEX")
                .help("Regex with one capture group extracting the member id from a file name"),
        )
        .arg(
            Arg::new("member-order")
                .long("member-order")
                .value_name("ORDER")
                .help("Ordering of the member axis")
                .value_parser(["numeric", "lexical"]),
        )
        .arg(
            Arg::new("chunk-steps")
                .long("chunk-steps")
                .value_name("COUNT")
                .help("Maximum time steps per chunk (default: one chunk per file)"),
        )
        .arg(
            Arg::new("one-file-per-member")
                .long("one-file-per-member")
                .help("Fail when a member is spread over several files")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("lat-names")
                .long("lat-names")
                .value_name("LIST")
                .help("Comma separated latitude variable candidates"),
        )
        .arg(
            Arg::new("lon-names")
                .long("lon-names")
                .value_name("LIST")
                .help("Comma separated longitude variable candidates"),
        )
        .arg(
            Arg::new("num-threads")
                .short('j')
                .long("num-threads")
                .value_name("COUNT")
                .help("Number of compute threads"),
        )
}

fn reference_kind_arg() -> Arg {
    Arg::new("reference-kind")
        .long("reference-kind")
        .value_name("KIND")
        .help("Coordinate naming of the reference dataset")
        .value_parser(["ensemble", "spartacus", "inca"])
        .default_value("spartacus")
}

pub fn build_cli() -> Command {
    Command::new("ensgrid")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Unify multi-member climate ensembles and score them against reference grids")
        .subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .subcommand(assembly_args(
            Command::new("info").about("Assemble an ensemble and print its layout"),
        ))
        .subcommand(
            assembly_args(Command::new("subset").about("Assemble, subset to a region and write NetCDF"))
                .arg(
                    Arg::new("bbox")
                        .long("bbox")
                        .value_name("LAT_MIN,LAT_MAX,LON_MIN,LON_MAX")
                        .help("Bounding box in degrees"),
                )
                .arg(
                    Arg::new("reference")
                        .long("reference")
                        .value_name("FILE")
                        .help("Use the extent of this reference file as the region"),
                )
                .arg(reference_kind_arg())
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("FILE")
                        .help("Output NetCDF file")
                        .required(true),
                ),
        )
        .subcommand(
            assembly_args(Command::new("bias").about("Compute ME, MAE and RMSE against a reference"))
                .arg(
                    Arg::new("reference")
                        .short('r')
                        .long("reference")
                        .value_name("FILE")
                        .help("Reference NetCDF file")
                        .required(true),
                )
                .arg(reference_kind_arg())
                .arg(
                    Arg::new("reference-variable")
                        .long("reference-variable")
                        .value_name("NAME")
                        .help("Variable of the reference file (auto-detected when omitted)"),
                )
                .arg(
                    Arg::new("period")
                        .short('p')
                        .long("period")
                        .value_name("PERIOD")
                        .help("Resampling period: daily, monthly or annual")
                        .default_value("daily"),
                )
                .arg(
                    Arg::new("reduction")
                        .long("reduction")
                        .value_name("METHOD")
                        .help("Reduction within a period")
                        .value_parser(["mean", "sum"])
                        .default_value("mean"),
                )
                .arg(
                    Arg::new("per-member")
                        .long("per-member")
                        .help("Score every member instead of the ensemble mean")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("start")
                        .short('s')
                        .long("start")
                        .value_name("DATETIME")
                        .help("Start of the evaluation window (YYYY-MM-DD [HH:MM:SS])"),
                )
                .arg(
                    Arg::new("end")
                        .short('e')
                        .long("end")
                        .value_name("DATETIME")
                        .help("End of the evaluation window (YYYY-MM-DD [HH:MM:SS])"),
                )
                .arg(
                    Arg::new("dims")
                        .long("dims")
                        .value_name("LIST")
                        .help("Dimensions to reduce over")
                        .default_value("time,y,x"),
                ),
        )
}

fn required(matches: &ArgMatches, name: &str) -> Result<String> {
    matches
        .get_one::<String>(name)
        .cloned()
        .ok_or_else(|| EnsembleError::Config(format!("missing argument '{}'", name)))
}

fn parse_kind(matches: &ArgMatches) -> Result<DatasetKind> {
    required(matches, "reference-kind")?.parse()
}

fn parse_number(text: &str, name: &str) -> Result<usize> {
    text.parse()
        .map_err(|_| EnsembleError::Config(format!("invalid value '{}' for {}", text, name)))
}

fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bbox(text: &str) -> Result<SpatialBounds> {
    let values = text
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .map_err(|_| EnsembleError::Config(format!("invalid bounding box value '{}'", v)))
        })
        .collect::<Result<Vec<f64>>>()?;
    match values.as_slice() {
        &[lat_min, lat_max, lon_min, lon_max] => SpatialBounds::new(lat_min, lat_max, lon_min, lon_max),
        _ => Err(EnsembleError::Config(format!(
            "bounding box needs 4 values, got {}",
            values.len()
        ))),
    }
}
