//! certaudit: audit a directory of X.509 certificates for chain
//! completeness, trust and validity.

use anyhow::{Context, Result};
use certaudit_lib::{
    AnchorSource, CertDirectory, CertificatePool, ClassifyOptions, LoadOptions, PemFile,
    SourceStatus, SystemBundle, TextOptions, TrustAnchorTable,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "certaudit",
    about = "Audit a directory of X.509 certificates for chain completeness and trust",
    long_about = "certaudit loads every certificate file in a directory (PEM or DER,\n\
                  including multi-certificate bundles), rebuilds issuer chains by\n\
                  subject/issuer name matching, and classifies each certificate\n\
                  against a set of trust anchors.\n\n\
                  Trust is decided by SHA-256 fingerprint membership in the anchor\n\
                  set. Signatures are not verified.",
    after_help = "EXAMPLES:\n\
                  \n  certaudit analyze ./cacerts\
                  \n  certaudit analyze --CAfile roots.pem --no-system ./ecu-bundle\
                  \n  certaudit analyze --json ./cacerts > report.json\
                  \n  certaudit analyze --output report.txt --expiry-warning 30d ./cacerts\
                  \n  certaudit anchors"
)]
struct Cli {
    /// Log verbosity (overrides RUST_LOG)
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Where trust anchors come from.
#[derive(Args, Debug, Clone, Default)]
struct AnchorArgs {
    /// PEM bundle of trusted root certificates (repeatable)
    #[arg(long = "CAfile", visible_alias = "ca-file", value_name = "FILE")]
    ca_file: Vec<PathBuf>,
    /// Directory of trusted root certificates, PEM or DER (repeatable)
    #[arg(long = "CApath", visible_alias = "ca-path", value_name = "DIR")]
    ca_path: Vec<PathBuf>,
    /// Do not load the system trust store
    #[arg(long)]
    no_system: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and classify the chain of every certificate in a folder
    #[command(
        after_help = "Supported files: .pem, .crt, .cer, .der and OpenSSL hash links\n\
                      (xxxxxxxx.0). Files that do not decode are listed and skipped.\n\
                      \nTrust anchors come from the system store plus any --CAfile and\n\
                      --CApath given. Earlier sources win when two share a fingerprint.\n\
                      \nDURATION FORMAT:\n\
                      \n  Plain numbers are treated as seconds. You can also use humantime\
                      \n  notation: s, m/min, h/hr, d/day, w/week, month, y/year.\
                      \n\nEXAMPLES:\n\
                      \n  certaudit analyze ./cacerts\
                      \n  certaudit analyze -r ./firmware/etc/ssl\
                      \n  certaudit analyze --check-chain-validity ./cacerts\
                      \n  certaudit analyze --attime 1767225600 ./cacerts\
                      \n  certaudit analyze --CApath /etc/ssl/certs --no-system ./bundle"
    )]
    Analyze {
        /// Folder of certificate files
        folder: PathBuf,
        #[command(flatten)]
        anchors: AnchorArgs,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
        /// Write the report to FILE instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
        /// Recurse into subdirectories
        #[arg(short, long)]
        recurse: bool,
        /// Evaluate validity at this Unix time instead of now
        #[arg(long, value_name = "EPOCH")]
        attime: Option<i64>,
        /// Require every certificate in the chain to be within its validity window
        #[arg(long)]
        check_chain_validity: bool,
        /// Flag valid certificates expiring within DURATION (e.g. 30d)
        #[arg(long, value_name = "DURATION")]
        expiry_warning: Option<String>,
    },
    /// List trust anchor sources and how many certificates each provides
    #[command(after_help = "EXAMPLES:\n\
                      \n  certaudit anchors\
                      \n  certaudit anchors --CAfile roots.pem\
                      \n  certaudit anchors --json")]
    Anchors {
        #[command(flatten)]
        anchors: AnchorArgs,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

/// Parse a duration string using humantime format.
///
/// Plain numbers (e.g. "3600") default to seconds. Otherwise, standard
/// humantime units are accepted: `s`, `m`, `h`, `d`, `w`, `months`, `y`, etc.
fn parse_duration(s: &str) -> Result<Duration> {
    if s.chars().all(|c| c.is_ascii_digit()) {
        let secs: u64 = s.parse().context("Invalid duration value")?;
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).with_context(|| format!("Invalid duration: '{s}'"))
}

fn init_logger(level: Option<LogLevel>) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if let Some(level) = level {
        builder.filter_level(level.into());
    }
    builder.init();
}

/// Anchor sources in load order, each tagged with whether the user asked
/// for it explicitly.
fn anchor_sources(args: &AnchorArgs) -> Vec<(Box<dyn AnchorSource>, bool)> {
    let mut sources: Vec<(Box<dyn AnchorSource>, bool)> = Vec::new();
    for file in &args.ca_file {
        sources.push((Box::new(PemFile(file.clone())), true));
    }
    for dir in &args.ca_path {
        sources.push((Box::new(CertDirectory(dir.clone())), true));
    }
    if !args.no_system {
        sources.push((Box::new(SystemBundle), false));
    }
    sources
}

/// Build the anchor table. A failing explicit source is fatal; a missing
/// system store was already logged by the library and is kept in the
/// statuses.
fn load_anchors(args: &AnchorArgs) -> Result<(TrustAnchorTable, Vec<SourceStatus>)> {
    let (sources, required): (Vec<_>, Vec<_>) = anchor_sources(args).into_iter().unzip();
    let (table, statuses) = TrustAnchorTable::from_sources(&sources);
    check_required(&statuses, &required)?;
    Ok((table, statuses))
}

/// Fail on the first required source that reported an error.
fn check_required(statuses: &[SourceStatus], required: &[bool]) -> Result<()> {
    for (status, &required) in statuses.iter().zip(required) {
        if let (Some(err), true) = (&status.error, required) {
            anyhow::bail!("Failed to load trust anchors: {}", err);
        }
    }
    Ok(())
}

fn eval_time(attime: Option<i64>) -> Result<Option<time::OffsetDateTime>> {
    attime
        .map(|t| {
            time::OffsetDateTime::from_unix_timestamp(t)
                .with_context(|| format!("Invalid --attime value: {}", t))
        })
        .transpose()
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.log_level);

    match &cli.command {
        Commands::Analyze {
            folder,
            anchors,
            json,
            output,
            recurse,
            attime,
            check_chain_validity,
            expiry_warning,
        } => {
            if !folder.is_dir() {
                anyhow::bail!("Not a directory: {}", folder.display());
            }
            let expiry_warning = expiry_warning
                .as_deref()
                .map(|s| {
                    let d = parse_duration(s)?;
                    time::Duration::try_from(d).context("Duration out of range")
                })
                .transpose()?;
            let classify = ClassifyOptions {
                at_time: eval_time(*attime)?,
                check_whole_chain: *check_chain_validity,
            };

            let (table, _) = load_anchors(anchors)?;
            let (pool, load) =
                CertificatePool::load_dir(folder, &LoadOptions { recurse: *recurse })
                    .with_context(|| format!("Failed to load {}", folder.display()))?;
            let report = certaudit_lib::analyze(&pool, &table, &classify);

            let rendered = if *json {
                certaudit_lib::to_json(&report, &load)?
            } else {
                certaudit_lib::display_text(&report, &load, &TextOptions { expiry_warning })
            };

            match output {
                Some(path) => {
                    std::fs::write(path, rendered.as_bytes())
                        .with_context(|| format!("Failed to write report: {}", path.display()))?;
                    let s = &report.summary;
                    println!("Report written to {}", path.display());
                    println!(
                        "Decoded {}/{} files, {} certificates",
                        load.files_decoded, load.files_processed, s.total
                    );
                    if s.total > 0 {
                        println!(
                            "Valid: {:.1}% | Trusted: {:.1}%",
                            s.valid_percent, s.trusted_percent
                        );
                    }
                }
                None => print!("{}", rendered),
            }
        }
        Commands::Anchors { anchors, json } => {
            let (table, statuses) = load_anchors(anchors)?;
            if *json {
                let value = serde_json::json!({
                    "sources": statuses,
                    "total": table.len(),
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                for s in &statuses {
                    match &s.error {
                        None => println!("{}: {} loaded, {} new", s.name, s.loaded, s.added),
                        Some(e) => println!("{}: FAIL ({})", s.name, e),
                    }
                }
                println!("Total: {} trust anchors", table.len());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ---- Duration parsing ----

    #[test]
    fn parse_plain_seconds() {
        assert_eq!(parse_duration("3600").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn parse_plain_zero() {
        assert_eq!(parse_duration("0").unwrap(), Duration::from_secs(0));
    }

    #[test]
    fn parse_days() {
        assert_eq!(parse_duration("30d").unwrap(), Duration::from_secs(2_592_000));
    }

    #[test]
    fn parse_weeks() {
        assert_eq!(parse_duration("1w").unwrap(), Duration::from_secs(604_800));
    }

    #[test]
    fn parse_combined_units() {
        assert_eq!(parse_duration("1d12h").unwrap(), Duration::from_secs(129_600));
    }

    #[test]
    fn reject_empty_duration() {
        // All-digit check is vacuously true for "", so this must fail to parse.
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn reject_garbage_duration() {
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("-5d").is_err());
    }

    // ---- Argument handling ----

    #[test]
    fn analyze_flags() {
        let cli = Cli::try_parse_from([
            "certaudit",
            "analyze",
            "--CAfile",
            "a.pem",
            "--ca-file",
            "b.pem",
            "--no-system",
            "-r",
            "--attime",
            "1767225600",
            "--log-level",
            "debug",
            "certs",
        ])
        .unwrap();
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        match cli.command {
            Commands::Analyze {
                folder,
                anchors,
                recurse,
                attime,
                ..
            } => {
                assert_eq!(folder, PathBuf::from("certs"));
                assert_eq!(anchors.ca_file.len(), 2);
                assert!(anchors.no_system);
                assert!(recurse);
                assert_eq!(attime, Some(1_767_225_600));
            }
            Commands::Anchors { .. } => unreachable!("parsed as anchors"),
        }
    }

    #[test]
    fn analyze_requires_folder() {
        assert!(Cli::try_parse_from(["certaudit", "analyze"]).is_err());
    }

    #[test]
    fn source_order_puts_system_last() {
        let args = AnchorArgs {
            ca_file: vec![PathBuf::from("a.pem")],
            ca_path: vec![PathBuf::from("dir")],
            no_system: false,
        };
        let names: Vec<_> = anchor_sources(&args)
            .iter()
            .map(|(s, required)| (s.name(), *required))
            .collect();
        assert_eq!(
            names,
            vec![
                ("file:a.pem".to_string(), true),
                ("dir:dir".to_string(), true),
                ("system".to_string(), false),
            ]
        );
    }

    #[test]
    fn missing_explicit_anchor_file_is_fatal() {
        let args = AnchorArgs {
            ca_file: vec![PathBuf::from("/definitely/not/here.pem")],
            ca_path: vec![],
            no_system: true,
        };
        assert!(load_anchors(&args).is_err());
    }

    #[test]
    fn explicit_anchor_directory_loads() {
        let dir = tempfile::tempdir().unwrap();
        let args = AnchorArgs {
            ca_file: vec![],
            ca_path: vec![dir.path().to_path_buf()],
            no_system: true,
        };
        let (table, statuses) = load_anchors(&args).unwrap();
        assert!(table.is_empty());
        assert_eq!(statuses.len(), 1);
    }

    #[test]
    fn optional_source_failure_is_kept_not_fatal() {
        let statuses = vec![
            SourceStatus {
                name: "dir:certs".into(),
                loaded: 2,
                added: 2,
                error: None,
            },
            SourceStatus {
                name: "system".into(),
                loaded: 0,
                added: 0,
                error: Some("no system CA bundle found".into()),
            },
        ];
        assert!(check_required(&statuses, &[true, false]).is_ok());

        let err = check_required(&statuses, &[true, true]).unwrap_err();
        assert!(err.to_string().contains("no system CA bundle found"));
    }

    #[test]
    fn attime_conversion() {
        let t = eval_time(Some(0)).unwrap().unwrap();
        assert_eq!(t, time::OffsetDateTime::UNIX_EPOCH);
        assert!(eval_time(None).unwrap().is_none());
        assert!(eval_time(Some(i64::MAX)).is_err());
    }
}
