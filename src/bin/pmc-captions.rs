//! CLI binary for pmc-captions.
//!
//! A thin shim over the library crate: maps flags to `HarvestConfig`,
//! builds a `RunPlan` for the chosen mode and reports progress.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pmc_captions::{
    shard_manifest, split_manifest, HarvestConfig, HarvestProgressCallback, HarvestStats,
    Harvester, ProgressCallback, RunPlan,
};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar per manifest, with running written/skipped totals in the message
/// and a log line above the bar for every skipped entry.
struct CliProgressCallback {
    bar: ProgressBar,
    written: AtomicUsize,
    skipped: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Reading manifest…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            written: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        })
    }

    fn refresh_message(&self) {
        self.bar.set_message(format!(
            "{} pairs  {} skipped",
            self.written.load(Ordering::SeqCst),
            self.skipped.load(Ordering::SeqCst)
        ));
    }
}

impl HarvestProgressCallback for CliProgressCallback {
    fn on_harvest_start(&self, name: &str, total_entries: usize) {
        self.written.store(0, Ordering::SeqCst);
        self.skipped.store(0, Ordering::SeqCst);

        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>6}/{len} entries  {msg}  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.reset();
        self.bar.set_length(total_entries as u64);
        self.bar.set_style(style);
        self.bar.set_prefix(name.to_string());
        self.bar.enable_steady_tick(Duration::from_millis(80));
        self.refresh_message();
    }

    fn on_entry_written(&self, _index: usize, _total: usize, _pmcid: &str, records: usize) {
        self.written.fetch_add(records, Ordering::SeqCst);
        self.refresh_message();
        self.bar.inc(1);
    }

    fn on_entry_skipped(&self, _index: usize, _total: usize, pmcid: &str, reason: &str) {
        self.skipped.fetch_add(1, Ordering::SeqCst);

        let msg = if reason.chars().count() > 100 {
            let cut: String = reason.chars().take(99).collect();
            format!("{cut}\u{2026}")
        } else {
            reason.to_string()
        };
        self.bar
            .println(format!("  {} {:<12} {}", red("✗"), pmcid, dim(&msg)));
        self.refresh_message();
        self.bar.inc(1);
    }

    fn on_harvest_complete(&self, name: &str, stats: &HarvestStats) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {}  {}",
            green("✔"),
            bold(&stats.summary(name)),
            dim(&format!(
                "{} duplicates, {} captions dropped, {:.1}s",
                stats.duplicates,
                stats.caption_failures,
                stats.duration_ms as f64 / 1000.0
            ))
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Paired dev/test run, first 100 entries of each list
  pmc-captions devtest --dev-list lists/dev.txt --test-list lists/test.txt \
      --out-root out --subset-size 100

  # Sharded training run, skip packages over 200 MB
  pmc-captions shards --shard-dir lists/train_shards --out-root out --max-filesize-mb 200

  # Split the full file list into train/dev/test by pmcid hash
  pmc-captions split --input oa_file_list.txt --out-dir lists

  # Cut the train list into shards of 10,000 rows
  pmc-captions shard --input lists/oa_file_list_train.txt --out-dir lists/train_shards

OUTPUT LAYOUT:
  out/dev.jsonl                       one JSON record per caption-image pair
  out/images/dev/PMC…/PMC…_fig-….jpg  normalized RGB JPEGs

  Re-running the same command resumes: pairs already in the .jsonl are skipped.
  Pass --no-resume to start new index files; add --overwrite to replace
  index files that already hold records.

ENVIRONMENT VARIABLES:
  Every harvest flag can also be set as PMC_CAPTIONS_<FLAG>, e.g.
  PMC_CAPTIONS_MAX_FILESIZE_MB=200. RUST_LOG overrides the log filter.
"#;

/// Build a caption-image dataset from the PMC open-access subset.
#[derive(Parser, Debug)]
#[command(
    name = "pmc-captions",
    version,
    about = "Build a caption-image dataset from PubMed Central open-access packages",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PMC_CAPTIONS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PMC_CAPTIONS_QUIET")]
    quiet: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "PMC_CAPTIONS_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Harvest a dev list and a test list into one output root.
    Devtest {
        #[arg(long, env = "PMC_CAPTIONS_DEV_LIST")]
        dev_list: PathBuf,

        #[arg(long, env = "PMC_CAPTIONS_TEST_LIST")]
        test_list: PathBuf,

        #[arg(long, env = "PMC_CAPTIONS_OUT_ROOT")]
        out_root: PathBuf,

        #[command(flatten)]
        harvest: HarvestArgs,
    },

    /// Harvest every *.txt shard manifest in a directory, in name order.
    Shards {
        #[arg(long, env = "PMC_CAPTIONS_SHARD_DIR")]
        shard_dir: PathBuf,

        #[arg(long, env = "PMC_CAPTIONS_OUT_ROOT")]
        out_root: PathBuf,

        #[command(flatten)]
        harvest: HarvestArgs,
    },

    /// Split a manifest into train/dev/test lists by pmcid hash.
    Split {
        #[arg(long)]
        input: PathBuf,

        /// Defaults to the input's directory.
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Cut a manifest into fixed-size shards, header repeated in each.
    Shard {
        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        out_dir: PathBuf,

        #[arg(long, default_value = "pubmed_open_access_file_list")]
        prefix: String,

        /// Rows per shard, header excluded.
        #[arg(long, default_value_t = 10_000)]
        shard_size: usize,
    },
}

#[derive(Args, Debug)]
struct HarvestArgs {
    /// Attempt only the first N well-formed rows of each manifest.
    #[arg(long, env = "PMC_CAPTIONS_SUBSET_SIZE")]
    subset_size: Option<usize>,

    /// Skip packages larger than this many megabytes.
    #[arg(long, env = "PMC_CAPTIONS_MAX_FILESIZE_MB")]
    max_filesize_mb: Option<u64>,

    /// Start new index files instead of resuming them. Refuses index files
    /// that already hold records unless --overwrite is given.
    #[arg(long, env = "PMC_CAPTIONS_NO_RESUME")]
    no_resume: bool,

    /// With --no-resume, truncate existing index files.
    #[arg(long, env = "PMC_CAPTIONS_OVERWRITE", requires = "no_resume")]
    overwrite: bool,

    /// Base URL tried first for every package.
    #[arg(long, env = "PMC_CAPTIONS_PRIMARY_BASE")]
    primary_base: Option<String>,

    /// Base URL tried when the primary fails.
    #[arg(long, env = "PMC_CAPTIONS_FALLBACK_BASE", conflicts_with = "no_fallback")]
    fallback_base: Option<String>,

    /// Use the primary endpoint only.
    #[arg(long, env = "PMC_CAPTIONS_NO_FALLBACK")]
    no_fallback: bool,

    /// JPEG quality for normalized images (1–100).
    #[arg(long, env = "PMC_CAPTIONS_JPEG_QUALITY", default_value_t = 90,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// Parent directory for per-package temp storage.
    #[arg(long, env = "PMC_CAPTIONS_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Seconds to wait for a connection or the next chunk of a download.
    #[arg(long, env = "PMC_CAPTIONS_DOWNLOAD_TIMEOUT", default_value_t = 60)]
    download_timeout: u64,

    /// Size-check (HEAD) timeout in seconds.
    #[arg(long, env = "PMC_CAPTIONS_HEAD_TIMEOUT", default_value_t = 30)]
    head_timeout: u64,

    /// Log running totals every N entries.
    #[arg(long, env = "PMC_CAPTIONS_REPORT_EVERY", default_value_t = 100)]
    report_every: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar and its skip lines carry the same information.
    let harvesting = matches!(cli.command, Command::Devtest { .. } | Command::Shards { .. });
    let show_progress = harvesting && !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn HarvestProgressCallback>)
    } else {
        None
    };

    match cli.command {
        Command::Devtest {
            dev_list,
            test_list,
            out_root,
            harvest,
        } => {
            let plan = RunPlan::dev_test(&dev_list, &test_list, &out_root);
            run(&plan, &harvest, progress_cb, cli.quiet || show_progress).await
        }
        Command::Shards {
            shard_dir,
            out_root,
            harvest,
        } => {
            let plan = RunPlan::shards(&shard_dir, &out_root)
                .with_context(|| format!("Cannot plan shards from {}", shard_dir.display()))?;
            run(&plan, &harvest, progress_cb, cli.quiet || show_progress).await
        }
        Command::Split { input, out_dir } => {
            let out_dir = out_dir
                .or_else(|| input.parent().map(|p| p.to_path_buf()))
                .unwrap_or_else(|| PathBuf::from("."));
            let out = split_manifest(&input, &out_dir).context("Split failed")?;
            if !cli.quiet {
                eprintln!(
                    "{} train {}  dev {}  test {}  {}",
                    green("✔"),
                    out.train_rows,
                    out.dev_rows,
                    out.test_rows,
                    dim(&format!("({} short rows skipped)", out.skipped_rows))
                );
            }
            Ok(())
        }
        Command::Shard {
            input,
            out_dir,
            prefix,
            shard_size,
        } => {
            let shards =
                shard_manifest(&input, &out_dir, &prefix, shard_size).context("Sharding failed")?;
            if !cli.quiet {
                eprintln!(
                    "{} {} shards  →  {}",
                    green("✔"),
                    shards.len(),
                    bold(&out_dir.display().to_string())
                );
            }
            Ok(())
        }
    }
}

/// Run every job of `plan`; prints one summary per job unless the progress
/// callback already did.
async fn run(
    plan: &RunPlan,
    args: &HarvestArgs,
    progress: Option<ProgressCallback>,
    silent_summary: bool,
) -> Result<()> {
    let config = build_config(args, progress)?;
    let harvester = Harvester::with_jats(config).context("Failed to set up harvester")?;

    let all = harvester
        .run_plan(plan)
        .await
        .context("Harvest aborted")?;

    if !silent_summary {
        for (job, stats) in plan.jobs.iter().zip(&all) {
            eprintln!("{}", stats.summary(&job.name));
        }
    }
    Ok(())
}

/// Map CLI args to `HarvestConfig`.
fn build_config(args: &HarvestArgs, progress: Option<ProgressCallback>) -> Result<HarvestConfig> {
    let mut builder = HarvestConfig::builder()
        .resume(!args.no_resume)
        .overwrite_index(args.overwrite)
        .jpeg_quality(args.jpeg_quality)
        .download_timeout_secs(args.download_timeout)
        .head_timeout_secs(args.head_timeout)
        .report_every(args.report_every);

    if let Some(ref url) = args.primary_base {
        builder = builder.primary_base(url);
    }
    if args.no_fallback {
        builder = builder.no_fallback();
    } else if let Some(ref url) = args.fallback_base {
        builder = builder.fallback_base(url);
    }
    if let Some(n) = args.subset_size {
        builder = builder.subset_size(n);
    }
    if let Some(mb) = args.max_filesize_mb {
        builder = builder.max_filesize_mb(mb);
    }
    if let Some(ref dir) = args.temp_dir {
        builder = builder.temp_dir(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
