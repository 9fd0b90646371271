use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{self, PipelineConfig};
use crate::error::{SplitgzError, SplitgzResult};
use crate::operations::Action;

#[derive(Debug, Clone)]
pub struct SplitgzArgs {
    pub action: Option<Action>,
    pub source: Option<PathBuf>,
    pub destination: Option<PathBuf>,
    pub portion_size: usize,
    pub max_memory: u64,
    pub workers: usize,
    pub compression_level: u32,
    pub timeout: Duration,
    pub strict_manifest: bool,
    pub quiet: bool,
    pub verbosity: u8,
    pub help: bool,
    pub version: bool,
    positionals: usize,
}

impl Default for SplitgzArgs {
    fn default() -> Self {
        SplitgzArgs {
            action: None,
            source: None,
            destination: None,
            portion_size: config::DEFAULT_PORTION_SIZE,
            max_memory: config::DEFAULT_MAX_MEMORY,
            workers: config::default_workers(),
            compression_level: config::DEFAULT_COMPRESSION_LEVEL,
            timeout: config::DEFAULT_TIMEOUT,
            strict_manifest: false,
            quiet: false,
            verbosity: 1,
            help: false,
            version: false,
            positionals: 0,
        }
    }
}

impl SplitgzArgs {
    pub fn parse() -> SplitgzResult<Self> {
        let mut argv: Vec<String> = env::args().skip(1).collect();

        // Options from the environment come first so the command line wins
        if let Ok(env_args) = env::var("SPLITGZ") {
            argv.splice(0..0, parse_env_args(&env_args));
        }

        Self::parse_from(argv)
    }

    pub fn parse_from(argv: Vec<String>) -> SplitgzResult<Self> {
        let mut args = SplitgzArgs::default();
        let mut i = 0;
        let mut in_options = true;

        while i < argv.len() {
            let arg = &argv[i];

            if !in_options || !arg.starts_with('-') || arg == "-" {
                args.push_positional(arg)?;
                i += 1;
                continue;
            }

            if arg == "--" {
                in_options = false;
                i += 1;
                continue;
            }

            if let Some(long) = arg.strip_prefix("--") {
                let (name, inline) = match long.split_once('=') {
                    Some((name, value)) => (name, Some(value.to_string())),
                    None => (long, None),
                };

                match name {
                    "help" => args.help = true,
                    "version" => args.version = true,
                    "strict-manifest" => args.strict_manifest = true,
                    "quiet" | "silent" => {
                        args.quiet = true;
                        args.verbosity = 0;
                    }
                    "verbose" => args.verbosity = args.verbosity.saturating_add(1),
                    "workers" | "level" | "timeout" | "max-memory" => {
                        let value = match inline {
                            Some(value) => value,
                            None => {
                                i += 1;
                                argv.get(i).cloned().ok_or_else(|| {
                                    SplitgzError::invalid_argument(format!(
                                        "--{} requires an argument",
                                        name
                                    ))
                                })?
                            }
                        };
                        args.set_value(name, &value)?;
                    }
                    _ => {
                        return Err(SplitgzError::invalid_argument(format!(
                            "Unknown option: {}",
                            arg
                        )))
                    }
                }
            } else {
                let chars: Vec<char> = arg.chars().collect();
                let mut j = 1;

                while j < chars.len() {
                    match chars[j] {
                        'h' => args.help = true,
                        'V' => args.version = true,
                        'q' => {
                            args.quiet = true;
                            args.verbosity = 0;
                        }
                        'v' => args.verbosity = args.verbosity.saturating_add(1),
                        'p' | 'l' | 't' => {
                            let opt_char = chars[j];

                            // Value is either attached (-p4) or the next argument
                            let value = if j + 1 < chars.len() {
                                let value: String = chars[j + 1..].iter().collect();
                                j = chars.len();
                                value
                            } else {
                                i += 1;
                                argv.get(i).cloned().ok_or_else(|| {
                                    SplitgzError::invalid_argument(format!(
                                        "-{} requires an argument",
                                        opt_char
                                    ))
                                })?
                            };

                            let name = match opt_char {
                                'p' => "workers",
                                'l' => "level",
                                _ => "timeout",
                            };
                            args.set_value(name, &value)?;
                        }
                        other => {
                            return Err(SplitgzError::invalid_argument(format!(
                                "Unknown option: -{}",
                                other
                            )))
                        }
                    }
                    j += 1;
                }
            }

            i += 1;
        }

        Ok(args)
    }

    fn push_positional(&mut self, value: &str) -> SplitgzResult<()> {
        match self.positionals {
            0 => {
                self.action = Some(Action::parse(value).ok_or_else(|| {
                    SplitgzError::invalid_argument(format!("Unknown action type: {}", value))
                })?);
            }
            1 => self.source = Some(PathBuf::from(value)),
            2 => self.destination = Some(PathBuf::from(value)),
            3 => self.portion_size = parse_size(value, "portion size")?,
            _ => {
                return Err(SplitgzError::invalid_argument(
                    "Too many input parameters.",
                ))
            }
        }
        self.positionals += 1;
        Ok(())
    }

    fn set_value(&mut self, name: &str, value: &str) -> SplitgzResult<()> {
        match name {
            "workers" => {
                self.workers = parse_number(name, value)?;
                if self.workers == 0 {
                    return Err(SplitgzError::invalid_argument(
                        "workers must be at least 1",
                    ));
                }
            }
            "level" => {
                self.compression_level = parse_number(name, value)?;
                if self.compression_level > 9 {
                    return Err(SplitgzError::invalid_argument(format!(
                        "Invalid compression level: {} (expected 0-9)",
                        value
                    )));
                }
            }
            "timeout" => {
                let secs: u64 = parse_number(name, value)?;
                if secs == 0 || secs > config::MAX_TIMEOUT.as_secs() {
                    return Err(SplitgzError::invalid_argument(format!(
                        "timeout must be between 1 and {} seconds",
                        config::MAX_TIMEOUT.as_secs()
                    )));
                }
                self.timeout = Duration::from_secs(secs);
            }
            "max-memory" => self.max_memory = parse_size(value, "memory ceiling")? as u64,
            _ => unreachable!(),
        }
        Ok(())
    }

    /// Check the positionals against the filesystem.
    ///
    /// Skipped for `--help` and `--version`, which need no operands.
    pub fn validate(&self) -> SplitgzResult<()> {
        let (Some(_), Some(source), Some(destination)) =
            (self.action, &self.source, &self.destination)
        else {
            return Err(SplitgzError::invalid_argument(
                "Not enough input parameters.",
            ));
        };

        if !source.exists() {
            return Err(SplitgzError::NotFound(source.display().to_string()));
        }

        if destination.exists() {
            return Err(SplitgzError::AlreadyExists(
                destination.display().to_string(),
            ));
        }

        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::default()
            .with_workers(self.workers)
            .with_timeout(self.timeout)
            .with_portion_size(self.portion_size)
            .with_max_memory(self.max_memory)
            .with_compression_level(self.compression_level)
            .with_strict_manifest(self.strict_manifest)
    }
}

fn parse_number<N: std::str::FromStr>(name: &str, value: &str) -> SplitgzResult<N> {
    value
        .parse()
        .map_err(|_| SplitgzError::invalid_argument(format!("Invalid {}: {}", name, value)))
}

fn parse_env_args(env_str: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current_arg = String::new();
    let mut in_quotes = false;

    for ch in env_str.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ' ' | '\t' if !in_quotes => {
                if !current_arg.is_empty() {
                    args.push(std::mem::take(&mut current_arg));
                }
            }
            _ => current_arg.push(ch),
        }
    }

    if !current_arg.is_empty() {
        args.push(current_arg);
    }

    args
}

/// Byte count with an optional `k`, `m` or `g` suffix
fn parse_size(value: &str, what: &str) -> SplitgzResult<usize> {
    let value = value.to_lowercase();

    if value.is_empty() {
        return Err(SplitgzError::invalid_argument(format!("Empty {}", what)));
    }

    let (num_str, multiplier) = if let Some(num) = value.strip_suffix('k') {
        (num, 1024)
    } else if let Some(num) = value.strip_suffix('m') {
        (num, 1024 * 1024)
    } else if let Some(num) = value.strip_suffix('g') {
        (num, 1024 * 1024 * 1024)
    } else {
        (value.as_str(), 1)
    };

    let num: usize = num_str
        .parse()
        .map_err(|_| SplitgzError::invalid_argument(format!("Invalid {}: {}", what, value)))?;

    let size = num
        .checked_mul(multiplier)
        .ok_or_else(|| SplitgzError::out_of_range(format!("{} too large: {}", what, value)))?;

    if size == 0 {
        return Err(SplitgzError::out_of_range(format!("{} must be positive", what)));
    }

    Ok(size)
}
