//! CLI for the strata time-series storage engine.
//!
//! Provides commands for inspecting, scanning, pruning, and benchmarking
//! strata stores.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use strata::{Point, SeriesStore, StoreConfig, TagSet, WriterConfig};

/// strata — Tagged time-series storage on hourly gzip NDJSON segments.
#[derive(Parser)]
#[command(name = "strata", version, about)]
struct Cli {
    /// JSON store configuration supplying the root and retention defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// List series, tag sets, segment counts, and disk usage.
    Info {
        /// Store root directory (defaults to the configured root).
        root: Option<PathBuf>,
    },

    /// Print the points of one series within a time window.
    Scan {
        /// Series name to scan.
        series: String,

        /// Store root directory (defaults to the configured root).
        root: Option<PathBuf>,

        /// Window ending now (e.g., "1h", "30m", "7d"). Ignored with --from.
        #[arg(long, default_value = "1h")]
        range: String,

        /// Window start (RFC 3339).
        #[arg(long, value_parser = parse_rfc3339)]
        from: Option<DateTime<Utc>>,

        /// Window end (RFC 3339, defaults to now).
        #[arg(long, value_parser = parse_rfc3339)]
        to: Option<DateTime<Utc>>,

        /// Timezone the writers named hour files in (IANA name).
        #[arg(long, value_parser = parse_timezone)]
        timezone: Option<Tz>,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Delete day directories older than the retention window.
    Retain {
        /// Store root directory (defaults to the configured root).
        #[arg(long)]
        root: Option<PathBuf>,

        /// Calendar days to keep besides today.
        #[arg(long)]
        days: Option<u32>,

        /// Timezone whose day boundaries apply (IANA name).
        #[arg(long, value_parser = parse_timezone)]
        timezone: Option<Tz>,

        /// Series to prune (all series when omitted).
        series: Vec<String>,
    },

    /// Run a write-path microbenchmark.
    Bench {
        /// Number of data points to write.
        #[arg(long, default_value = "1000000")]
        points: u64,

        /// Number of distinct tag sets to spread the points over.
        #[arg(long, default_value = "30")]
        tag_sets: u32,
    },
}

/// Output format for scan results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON array of objects.
    Json,
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::Info { root } => cmd_info(&resolve_root(root, config.as_ref())?),
        Commands::Scan {
            series,
            root,
            range,
            from,
            to,
            timezone,
            format,
        } => {
            let root = resolve_root(root, config.as_ref())?;
            let tz = timezone
                .or_else(|| config.as_ref().map(|c| c.writer.timezone))
                .unwrap_or(Tz::UTC);
            cmd_scan(&root, &series, &range, from, to, tz, &format)
        }
        Commands::Retain {
            root,
            days,
            timezone,
            series,
        } => {
            let root = resolve_root(root, config.as_ref())?;
            let days = days
                .or_else(|| config.as_ref().and_then(|c| c.retention_days))
                .ok_or("--days is required when the configuration sets no retention_days")?;
            let tz = timezone
                .or_else(|| config.as_ref().map(|c| c.retention_timezone))
                .unwrap_or(Tz::UTC);
            cmd_retain(&root, days, tz, &series)
        }
        Commands::Bench { points, tag_sets } => cmd_bench(points, tag_sets),
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> CliResult<Option<StoreConfig>> {
    match path {
        Some(path) => Ok(Some(StoreConfig::load(path)?)),
        None => Ok(None),
    }
}

/// Picks the explicit root, falling back to the configured one.
fn resolve_root(root: Option<PathBuf>, config: Option<&StoreConfig>) -> CliResult<PathBuf> {
    root.or_else(|| config.map(|c| c.root.clone()))
        .ok_or_else(|| "no store root given (pass a path or --config)".into())
}

/// Implements `strata info <root>`.
fn cmd_info(root: &Path) -> CliResult<()> {
    if !root.is_dir() {
        return Err(format!("No store found at '{}'", root.display()).into());
    }

    println!("Store: {}", root.display());
    println!();

    let series = sorted_subdirs(root)?;
    println!("Series: {}", series.len());

    for series_dir in &series {
        let name = series_dir.file_name().unwrap_or_default().to_string_lossy();
        let tag_dirs = sorted_subdirs(series_dir)?;
        println!();
        println!("  {name} ({} tag set(s))", tag_dirs.len());

        for tag_dir in &tag_dirs {
            let hash = tag_dir.file_name().unwrap_or_default().to_string_lossy();
            let labels_path = tag_dir.join(strata::layout::LABELS_FILE);
            let labels = std::fs::read_to_string(&labels_path)
                .ok()
                .and_then(|data| serde_json::from_str::<TagSet>(&data).ok())
                .map_or_else(|| "?".to_string(), |tags| format_tags(&tags));

            let (segments, bytes) = segment_stats(tag_dir)?;
            println!(
                "    {hash} {{{labels}}}: {segments} segment(s), {}",
                format_bytes(bytes)
            );
        }
    }

    let total_size = dir_size(root)?;
    println!();
    println!("Total disk usage: {} ({total_size} bytes)", format_bytes(total_size));

    Ok(())
}

/// Implements `strata scan <series> <root>`.
fn cmd_scan(
    root: &Path,
    series: &str,
    range: &str,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    tz: Tz,
    format: &OutputFormat,
) -> CliResult<()> {
    let to = to.unwrap_or_else(Utc::now);
    let from = match from {
        Some(from) => from,
        None => to
            .checked_sub_signed(parse_duration(range)?)
            .unwrap_or(DateTime::<Utc>::MIN_UTC),
    };

    let mut points: Vec<Point> = Vec::new();
    strata::scan_range_in(root, series, from, to, tz, |point| {
        points.push(point);
        true
    })?;

    match format {
        OutputFormat::Csv => {
            println!("# series={series}, from={from}, to={to}, points={}", points.len());
            println!("timestamp,value,tags");
            for point in &points {
                println!(
                    "{},{},\"{}\"",
                    point.timestamp.to_rfc3339(),
                    point.value,
                    point.tags.canonical()
                );
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "series": series,
                "from": from,
                "to": to,
                "count": points.len(),
                "data": points,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `strata retain --days N [series...]`.
fn cmd_retain(root: &Path, days: u32, tz: Tz, series: &[String]) -> CliResult<()> {
    let store = SeriesStore::new(root, WriterConfig::default());
    let names: Vec<&str> = series.iter().map(String::as_str).collect();
    let removed = store.retention(days, tz, &names)?;
    println!("Removed {removed} day director(ies) older than {days} day(s) ({tz})");
    Ok(())
}

/// Implements `strata bench`.
#[allow(clippy::cast_precision_loss)] // Benchmark stats are fine with f64 precision
fn cmd_bench(points: u64, tag_sets: u32) -> CliResult<()> {
    if tag_sets == 0 {
        return Err("--tag-sets must be at least 1".into());
    }

    println!("strata write-path benchmark");
    println!("  Points: {points}");
    println!("  Tag sets: {tag_sets}");
    println!();

    let temp_dir = std::env::temp_dir().join("strata_bench");
    let _ = std::fs::remove_dir_all(&temp_dir);

    let store = SeriesStore::new(&temp_dir, WriterConfig::default());
    let tags: Vec<TagSet> = (0..tag_sets)
        .map(|i| TagSet::from([("id", i.to_string())]))
        .collect();

    println!("Writing {points} data points across {tag_sets} tag sets...");

    let mut ts = Utc::now() - TimeDelta::days(1);
    let points_per_set = points / u64::from(tag_sets);

    let start = Instant::now();

    for _ in 0..points_per_set {
        ts += TimeDelta::seconds(1);
        for (i, tags) in (0..tag_sets).zip(&tags) {
            store.append("bench", Point::new(ts, f64::from(i), tags.clone()))?;
        }
    }
    store.close()?;

    let elapsed = start.elapsed();
    let total_writes = points_per_set * u64::from(tag_sets);
    let ns_per_write = elapsed.as_nanos() as f64 / total_writes.max(1) as f64;
    let writes_per_sec = total_writes as f64 / elapsed.as_secs_f64();
    let disk = dir_size(&temp_dir)?;

    println!();
    println!("Results:");
    println!("  Total writes: {total_writes}");
    println!("  Elapsed: {elapsed:.3?}");
    println!("  Avg latency: {ns_per_write:.1} ns/write");
    println!("  Throughput: {writes_per_sec:.0} writes/sec");
    println!("  On disk: {}", format_bytes(disk));
    println!();

    let _ = std::fs::remove_dir_all(&temp_dir);

    Ok(())
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 timestamp '{s}': {e}"))
}

fn parse_timezone(s: &str) -> Result<Tz, String> {
    s.parse::<Tz>()
        .map_err(|e| format!("unknown timezone '{s}': {e}"))
}

/// Parses a human-readable duration string (e.g., "1h", "30m", "7d").
fn parse_duration(s: &str) -> CliResult<TimeDelta> {
    let s = s.trim();
    let Some((unit_at, _)) = s.char_indices().next_back() else {
        return Err("Empty duration string".into());
    };

    let (num_str, unit) = s.split_at(unit_at);
    let num: i64 = num_str.parse()?;

    let delta = match unit {
        "s" => TimeDelta::try_seconds(num),
        "m" => TimeDelta::try_minutes(num),
        "h" => TimeDelta::try_hours(num),
        "d" => TimeDelta::try_days(num),
        _ => return Err(format!("Unknown duration unit: '{unit}'. Use s, m, h, or d.").into()),
    };

    delta.ok_or_else(|| format!("Duration out of range: '{s}'").into())
}

fn format_tags(tags: &TagSet) -> String {
    let pairs: Vec<_> = tags.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.join(", ")
}

/// Formats a byte count as a human-readable string.
#[allow(clippy::cast_precision_loss)] // Byte counts are display-only
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

fn sorted_subdirs(dir: &Path) -> CliResult<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Counts segment files and their total size below a tag directory.
fn segment_stats(dir: &Path) -> CliResult<(u64, u64)> {
    let mut count = 0;
    let mut bytes = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            let (c, b) = segment_stats(&path)?;
            count += c;
            bytes += b;
        } else if path
            .to_string_lossy()
            .ends_with(strata::layout::SEGMENT_EXTENSION)
        {
            count += 1;
            bytes += entry.metadata()?.len();
        }
    }
    Ok((count, bytes))
}

/// Recursively calculates directory size.
fn dir_size(path: &Path) -> CliResult<u64> {
    let mut total = 0;
    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                total += dir_size(&path)?;
            } else {
                total += entry.metadata()?.len();
            }
        }
    }
    Ok(total)
}
