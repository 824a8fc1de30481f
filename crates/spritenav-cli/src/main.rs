#![deny(unsafe_code)]

//! SpriteNav CLI: query a saved index snapshot from the command line.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use spritenav_config::AppConfig;
use spritenav_core::{IndexSnapshot, Navigator, Prediction, TieredCache};
use tracing::info;

/// SpriteNav: ranked guesses for where the next object starts.
#[derive(Parser)]
#[command(name = "spritenav", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "spritenav.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank likely object offsets near a position.
    Predict {
        /// Index snapshot (JSON).
        #[arg(long)]
        snapshot: PathBuf,

        /// Current offset, hex with or without `0x`.
        #[arg(long, value_parser = parse_offset)]
        offset: u64,

        /// Maximum number of hints.
        #[arg(long)]
        max: Option<usize>,

        /// Restrict to these strategies (repeatable).
        #[arg(long = "strategy")]
        strategies: Vec<String>,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show index statistics and pattern analysis.
    Stats {
        #[arg(long)]
        snapshot: PathBuf,
    },

    /// List objects similar to the one at an offset.
    Similar {
        #[arg(long)]
        snapshot: PathBuf,

        #[arg(long, value_parser = parse_offset)]
        offset: u64,

        #[arg(long, default_value_t = 10)]
        max: usize,
    },

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;
    let warnings = spritenav_core::logging::init(&config.logging, cli.verbose);

    match &cli.command {
        Commands::Config { show } => cmd_config(&cli.config, &config, *show)?,
        command => {
            let navigator = query_navigator(config)?;
            let output = run_query(&navigator, command)?;
            print!("{output}");
            navigator.shutdown().await;
        }
    }

    if cli.verbose == 0
        && let Some(reader) = warnings
        && !reader.is_empty()
    {
        eprintln!("{} warning(s) logged; rerun with -v for details", reader.len());
    }
    Ok(())
}

/// Navigator for one-shot queries. Snapshots come from the command line,
/// so the cache stays in memory and the configured cache directory is left
/// untouched.
fn query_navigator(config: AppConfig) -> Result<Navigator> {
    let cache = Arc::new(TieredCache::in_memory(config.cache.memory_capacity));
    Ok(Navigator::with_cache(config, cache)?)
}

fn run_query(navigator: &Navigator, command: &Commands) -> Result<String> {
    match command {
        Commands::Predict {
            snapshot,
            offset,
            max,
            strategies,
            json,
        } => {
            let source = load_snapshot(navigator, snapshot)?;
            let max = max.unwrap_or(navigator.config().navigator.max_hints);
            let names: Vec<&str> = strategies.iter().map(String::as_str).collect();
            let filter = (!names.is_empty()).then_some(names.as_slice());
            let predictions = navigator.predict(&source, *offset, max, filter)?;
            info!(source = %source, hints = predictions.len(), "prediction complete");
            if *json {
                Ok(serde_json::to_string_pretty(&predictions)? + "\n")
            } else {
                Ok(render_predictions(&predictions))
            }
        }
        Commands::Stats { snapshot } => {
            let source = load_snapshot(navigator, snapshot)?;
            let stats = navigator
                .statistics(&source)
                .context("index missing after load")?;
            let analysis = navigator.analysis(&source).context("index missing after load")?;
            let mut out = String::new();
            writeln!(out, "objects:            {}", stats.total_objects)?;
            writeln!(out, "coverage:           {:.2}%", stats.coverage_ratio * 100.0)?;
            writeln!(out, "mean stride:        {:#X}", analysis.spacing.mean_stride as u64)?;
            writeln!(out, "spacing confidence: {:.3}", analysis.spacing.confidence)?;
            writeln!(out, "size confidence:    {:.3}", analysis.sizes.confidence)?;
            writeln!(out, "region confidence:  {:.3}", analysis.regions.confidence)?;
            for (stride, count) in &analysis.spacing.common_strides {
                writeln!(out, "  stride {stride:#X}: {count}x")?;
            }
            for (region, count) in &stats.region_distribution {
                writeln!(out, "  {}: {count}", region.as_str())?;
            }
            Ok(out)
        }
        Commands::Similar {
            snapshot,
            offset,
            max,
        } => {
            let source = load_snapshot(navigator, snapshot)?;
            let index = navigator.index(&source).context("index missing after load")?;
            let Some(reference) = index.get(*offset) else {
                bail!("no object at {offset:#X} in {}", snapshot.display());
            };
            let mut out = String::new();
            for (object, score) in navigator.similar_to(&source, &reference, *max) {
                writeln!(
                    out,
                    "{:#010X}  {score:.3}  {} bytes -> {} bytes",
                    object.offset(),
                    object.encoded_size(),
                    object.decoded_size()
                )?;
            }
            Ok(out)
        }
        Commands::Config { .. } => bail!("config is not a query"),
    }
}

fn render_predictions(predictions: &[Prediction]) -> String {
    let mut out = String::new();
    for (rank, p) in predictions.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>2}. {:#010X}  conf {:.3}  score {:.3}  {:<8} {}",
            rank + 1,
            p.target_offset(),
            p.confidence(),
            p.score(),
            p.strategy().as_str(),
            p.reasoning()
        );
    }
    out
}

/// Hex offset with an optional `0x` prefix.
fn parse_offset(text: &str) -> Result<u64, String> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u64::from_str_radix(digits, 16).map_err(|e| format!("invalid hex offset '{text}': {e}"))
}

/// Read a snapshot file and hand it to the navigator under the file stem.
fn load_snapshot(navigator: &Navigator, path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let snapshot = IndexSnapshot::from_json(&text).with_context(|| format!("parsing {}", path.display()))?;
    let source = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    let blob_size = snapshot.blob_size;
    navigator.cache().put_snapshot(&source, snapshot);
    navigator.open_source(&source, blob_size);
    Ok(source)
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let toml_str = toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("TOML error: {e}"))?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

async fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load(path).await.map_err(|e| anyhow::anyhow!(e))
    } else {
        Ok(AppConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use spritenav_core::SpatialIndex;
    use spritenav_test_utils::config::TestConfigBuilder;
    use spritenav_test_utils::fixtures::{objects_at, strided_offsets};
    use tempfile::TempDir;

    fn snapshot_file(dir: &TempDir, offsets: &[u64]) -> PathBuf {
        let index = SpatialIndex::new(0x10_0000);
        for object in objects_at(offsets) {
            index.insert(object);
        }
        let path = dir.path().join("rom.json");
        std::fs::write(&path, index.snapshot().to_json().unwrap()).unwrap();
        path
    }

    fn navigator() -> Navigator {
        query_navigator(TestConfigBuilder::new().build()).unwrap()
    }

    #[test]
    fn test_parse_offset() {
        assert_eq!(parse_offset("0x1A00"), Ok(0x1A00));
        assert_eq!(parse_offset("1a00"), Ok(0x1A00));
        assert!(parse_offset("zz").is_err());
    }

    #[test]
    fn test_cli_parses_predict() {
        let cli = Cli::try_parse_from([
            "spritenav", "-v", "predict", "--snapshot", "rom.json", "--offset", "0x400", "--strategy", "linear",
            "--strategy", "pattern",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Predict {
                offset, strategies, ..
            } => {
                assert_eq!(offset, 0x400);
                assert_eq!(strategies, vec!["linear", "pattern"]);
            }
            _ => panic!("expected predict"),
        }
    }

    #[test]
    fn test_predict_from_snapshot() {
        let dir = TempDir::new().unwrap();
        let snapshot = snapshot_file(&dir, &strided_offsets(0x1000, 0x100, 6));
        let command = Commands::Predict {
            snapshot,
            offset: 0x1500,
            max: Some(3),
            strategies: vec!["pattern".to_string()],
            json: false,
        };
        let output = run_query(&navigator(), &command).unwrap();
        assert_eq!(output.lines().count(), 3);
        assert!(output.lines().next().unwrap().contains("0x00001600"));
    }

    #[test]
    fn test_stats_and_similar() {
        let dir = TempDir::new().unwrap();
        let snapshot = snapshot_file(&dir, &[0x1000, 0x1100, 0x1200]);
        let nav = navigator();

        let stats = run_query(&nav, &Commands::Stats { snapshot: snapshot.clone() }).unwrap();
        assert!(stats.starts_with("objects:            3"));

        let similar = run_query(
            &nav,
            &Commands::Similar {
                snapshot: snapshot.clone(),
                offset: 0x1000,
                max: 5,
            },
        )
        .unwrap();
        assert_eq!(similar.lines().count(), 2);

        let missing = Commands::Similar {
            snapshot,
            offset: 0x1234,
            max: 5,
        };
        assert!(run_query(&nav, &missing).is_err());
    }

    #[tokio::test]
    async fn test_queries_leave_cache_dir_untouched() {
        let dir = TempDir::new().unwrap();
        let snapshot = snapshot_file(&dir, &strided_offsets(0x1000, 0x100, 6));
        let cache_dir = dir.path().join("cache");
        let config = TestConfigBuilder::new()
            .disk_cache(&cache_dir.to_string_lossy())
            .build();

        let nav = query_navigator(config).unwrap();
        assert_eq!(nav.cache().tier_names(), vec!["memory"]);
        run_query(&nav, &Commands::Stats { snapshot }).unwrap();
        nav.shutdown().await;
        assert!(!cache_dir.exists());
    }
}
