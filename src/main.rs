use anyhow::{bail, Context, Result};
use cardsieve::services::report::{
    paginate_clusters, render_clusters, render_header, render_upload,
};
use cardsieve::{AppConfig, Bucket, Category, Engine, ScanPhase, ScanProgress};
use chrono::Local;
use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "cardsieve", version, about = "Find near-duplicate character images")]
struct Cli {
    /// Config file (default: platform config dir)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct BucketFilter {
    /// Only this category (card, bg, stamina)
    #[arg(long)]
    category: Option<Category>,
    /// Only this character id
    #[arg(long)]
    character: Option<String>,
    /// Similarity threshold (default from config)
    #[arg(long)]
    threshold: Option<f32>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan buckets and list duplicate groups
    Scan {
        #[command(flatten)]
        filter: BucketFilter,
        /// Print clusters as JSON
        #[arg(long)]
        json: bool,
    },

    /// List every matching pair without grouping
    Pairs {
        #[command(flatten)]
        filter: BucketFilter,
    },

    /// Add images to a bucket, rejecting ones that duplicate existing images
    Check {
        /// Images to add
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        category: Category,
        #[arg(long)]
        character: String,
        /// Keep duplicates in the bucket instead of removing them
        #[arg(long)]
        keep_blocked: bool,
    },

    /// Drop the cached features of an image
    Invalidate { file: PathBuf },

    /// Recompute the cached features of an image
    Refresh { file: PathBuf },

    /// Delete every image of a character, with its cache
    Purge {
        #[arg(long)]
        category: Category,
        #[arg(long)]
        character: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Locate images by display id
    Find { id: String },

    /// Print the effective config
    Config {
        /// Write it to the config path
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;

    if let Commands::Config { write } = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        if write {
            config
                .save(&config_path)
                .with_context(|| format!("Failed to write {}", config_path.display()))?;
            println!("💾 Saved to {}", config_path.display());
        }
        return Ok(());
    }

    let engine = Engine::from_config(config).context("Failed to start engine")?;

    match cli.command {
        Commands::Scan { filter, json } => {
            let threshold = filter.threshold.unwrap_or(engine.config().scan_threshold);
            let buckets = select_buckets(&engine, &filter);
            println!("▶ Scanning {} buckets (threshold {:.2})", buckets.len(), threshold);

            let clusters = benchmark("scan", run_scan(&engine, &buckets, threshold)).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&clusters)?);
            } else if clusters.is_empty() {
                println!("No duplicates found.");
            } else {
                println!("{}", render_header(Local::now(), &clusters));
                let sections = render_clusters(engine.library(), &clusters);
                let pages = paginate_clusters(sections, engine.config().report_page_size);
                let total = pages.len();
                for (i, page) in pages.iter().enumerate() {
                    println!("\n── page {}/{} ──", i + 1, total);
                    println!("{}", page.render());
                }
            }
        }

        Commands::Pairs { filter } => {
            let threshold = filter.threshold.unwrap_or(engine.config().scan_threshold);
            let buckets = select_buckets(&engine, &filter);
            let pairs = engine.scanner().scan_pairs(&buckets, threshold).await?;

            if pairs.is_empty() {
                println!("No duplicates found.");
            }
            for pair in pairs {
                println!(
                    "{:.2}  {}  {}",
                    pair.score,
                    engine.library().short_path(&pair.a),
                    engine.library().short_path(&pair.b)
                );
            }
        }

        Commands::Check {
            files,
            category,
            character,
            keep_blocked,
        } => {
            let bucket = engine.bucket(category, &character)?;
            fs::create_dir_all(&bucket.dir)
                .with_context(|| format!("Failed to create {}", bucket.dir.display()))?;

            let staged = add_to_bucket(&bucket, &files)?;
            let report = match engine
                .check_upload(category, &character, staged.paths.clone())
                .await
            {
                Ok(report) => report,
                Err(e) => {
                    staged.rollback();
                    return Err(e.into());
                }
            };
            let block_threshold = engine.config().block_threshold;
            println!("{}", render_upload(engine.library(), &report, block_threshold));

            if !keep_blocked {
                for blocked in report.blocked(block_threshold) {
                    fs::remove_file(&blocked.image)
                        .with_context(|| format!("Failed to remove {}", blocked.image.display()))?;
                    engine.invalidate(&blocked.image);
                    println!("   🗑️  Removed {}", blocked.image.display());
                }
            }
            let accepted = report.accepted(block_threshold).len();
            println!("✨ {} of {} images added to {}", accepted, staged.paths.len(), bucket);
        }

        Commands::Invalidate { file } => {
            let file = std::path::absolute(&file)?;
            engine.invalidate(&file);
            println!("🧹 Cache dropped for {}", file.display());
        }

        Commands::Refresh { file } => {
            let file = std::path::absolute(&file)?;
            if !file.is_file() {
                bail!("{} is not a file", file.display());
            }
            match engine.refresh(file.clone()).await? {
                Some(features) => println!("🔄 {} features cached for {}", features.len(), file.display()),
                None => println!("⚠️  No features could be extracted from {}", file.display()),
            }
        }

        Commands::Purge {
            category,
            character,
            yes,
        } => {
            let bucket = engine.bucket(category, &character)?;
            let confirmed = yes
                || Confirm::new()
                    .with_prompt(format!("Delete every image in {}?", bucket.dir.display()))
                    .default(false)
                    .interact()?;
            if !confirmed {
                println!("Aborted.");
                return Ok(());
            }
            let removed = engine.purge_bucket(category, &character)?;
            println!("🗑️  Deleted {} images from {}", removed, bucket);
        }

        Commands::Find { id } => {
            let found = engine.find(&id);
            if found.is_empty() {
                println!("No image with id {}", id);
            }
            for (bucket, path) in found {
                println!("▶ {}  {}", bucket, engine.library().short_path(&path));
            }
        }

        // printed before the engine starts
        Commands::Config { .. } => {}
    }

    Ok(())
}

fn select_buckets(engine: &Engine, filter: &BucketFilter) -> Vec<Bucket> {
    engine
        .library()
        .buckets()
        .into_iter()
        .filter(|b| filter.category.is_none_or(|c| b.category == c))
        .filter(|b| filter.character.as_ref().is_none_or(|c| &b.character == c))
        .collect()
}

/// Scan with a progress bar; Ctrl-C cancels outstanding buckets.
async fn run_scan(
    engine: &Engine,
    buckets: &[Bucket],
    threshold: f32,
) -> Result<Vec<cardsieve::DuplicateCluster>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<ScanProgress>();
    let scanner = engine.scanner().with_progress_sender(tx);

    let token = scanner.get_cancellation_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("⚠️  Cancelling scan…");
            token.store(true, Ordering::Relaxed);
        }
    });

    let bar = ProgressBar::new(buckets.len() as u64);
    bar.set_style(ProgressStyle::with_template(
        "{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}",
    )?);
    bar.enable_steady_tick(Duration::from_millis(100));

    let progress_bar = bar.clone();
    let progress = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            progress_bar.set_position(update.buckets_done as u64);
            match update.phase {
                ScanPhase::Discovery => progress_bar.set_message("starting"),
                ScanPhase::Clustering => progress_bar.set_message(format!(
                    "{} ({} groups)",
                    update.current_bucket, update.clusters_found
                )),
                ScanPhase::Complete => progress_bar.set_message("done"),
            }
        }
    });

    let result = scanner.scan(buckets, threshold).await;
    drop(scanner);
    let _ = progress.await;
    ctrl_c.abort();
    bar.finish_and_clear();

    Ok(result?)
}

/// Files handed to an upload check, and which of them were copied in.
#[derive(Debug, Default)]
struct Staged {
    paths: Vec<PathBuf>,
    copied: Vec<PathBuf>,
}

impl Staged {
    /// Remove the copies made for this upload. Files that already lived in
    /// the bucket are left alone.
    fn rollback(&self) {
        for path in &self.copied {
            if let Err(e) = fs::remove_file(path) {
                log::warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

/// Copy files into the bucket unless they already live there.
///
/// Every destination is checked before the first copy, and a failed copy
/// removes the ones already made.
fn add_to_bucket(bucket: &Bucket, files: &[PathBuf]) -> Result<Staged> {
    let bucket_dir = bucket
        .dir
        .canonicalize()
        .with_context(|| format!("Cannot read {}", bucket.dir.display()))?;

    let mut names = HashSet::new();
    let mut plan = Vec::with_capacity(files.len());
    for file in files {
        let file = file
            .canonicalize()
            .with_context(|| format!("Cannot read {}", file.display()))?;
        let name = file
            .file_name()
            .with_context(|| format!("{} has no file name", file.display()))?
            .to_owned();
        let dest = bucket.dir.join(&name);
        if !names.insert(name) {
            bail!("{} is given more than once", dest.display());
        }

        let needs_copy = file.parent() != Some(bucket_dir.as_path());
        if needs_copy && dest.exists() {
            bail!("{} already exists", dest.display());
        }
        plan.push((file, dest, needs_copy));
    }

    let mut staged = Staged::default();
    for (file, dest, needs_copy) in plan {
        if needs_copy {
            if let Err(e) = fs::copy(&file, &dest) {
                staged.rollback();
                return Err(e).with_context(|| {
                    format!("Failed to copy {} → {}", file.display(), dest.display())
                });
            }
            staged.copied.push(dest.clone());
        }
        staged.paths.push(dest);
    }
    Ok(staged)
}

/// Await `f`, print how long it took (with `label`), and return its result.
async fn benchmark<T>(label: &str, f: impl std::future::Future<Output = T>) -> T {
    let start = Instant::now();
    let result = f.await;
    println!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn bucket(dir: &TempDir) -> Bucket {
        let bucket_dir = dir.path().join("card").join("1102");
        fs::create_dir_all(&bucket_dir).unwrap();
        Bucket {
            category: Category::Card,
            character: "1102".to_string(),
            dir: bucket_dir,
        }
    }

    fn write(path: &std::path::Path) -> PathBuf {
        fs::write(path, b"not really a png").unwrap();
        path.to_path_buf()
    }

    #[test]
    fn test_existing_destination_copies_nothing() {
        let dir = TempDir::new().unwrap();
        let bucket = bucket(&dir);
        let incoming = dir.path().join("incoming");
        fs::create_dir_all(&incoming).unwrap();
        let first = write(&incoming.join("a.png"));
        let second = write(&incoming.join("b.png"));
        write(&bucket.dir.join("b.png"));

        assert!(add_to_bucket(&bucket, &[first, second]).is_err());
        assert!(!bucket.dir.join("a.png").exists());
    }

    #[test]
    fn test_repeated_name_copies_nothing() {
        let dir = TempDir::new().unwrap();
        let bucket = bucket(&dir);
        fs::create_dir_all(dir.path().join("x")).unwrap();
        fs::create_dir_all(dir.path().join("y")).unwrap();
        let first = write(&dir.path().join("x").join("a.png"));
        let second = write(&dir.path().join("y").join("a.png"));

        assert!(add_to_bucket(&bucket, &[first, second]).is_err());
        assert!(!bucket.dir.join("a.png").exists());
    }

    #[test]
    fn test_rollback_removes_only_copies() {
        let dir = TempDir::new().unwrap();
        let bucket = bucket(&dir);
        let outside = write(&dir.path().join("new.png"));
        let resident = write(&bucket.dir.join("old.png"));

        let staged = add_to_bucket(&bucket, &[outside, resident.clone()]).unwrap();
        assert_eq!(staged.paths, vec![bucket.dir.join("new.png"), bucket.dir.join("old.png")]);
        assert_eq!(staged.copied, vec![bucket.dir.join("new.png")]);
        assert!(bucket.dir.join("new.png").exists());

        staged.rollback();
        assert!(!bucket.dir.join("new.png").exists());
        assert!(resident.exists());
    }
}
