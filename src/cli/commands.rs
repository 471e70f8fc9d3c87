//! Command implementations.

use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::error;

use super::{EXIT_ABORTED, EXIT_CONFIG};
use crate::config::Config;
use crate::crawler::{CrawlEngine, EngineOutcome};
use crate::export::Exporter;
use crate::repository::Registry;

fn load_config(path: &Path) -> Result<Config, ExitCode> {
    Config::load(path).map_err(|e| {
        eprintln!("{} {}", style("config error:").red().bold(), e);
        ExitCode::from(EXIT_CONFIG)
    })
}

/// `crawl`: run to completion (exit 0) or until interrupted (exit 130).
pub async fn crawl(config_path: &Path) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let engine = match CrawlEngine::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            error!(error = %e, "failed to initialize crawl engine");
            eprintln!("{} {}", style("fatal:").red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    // SIGINT flips the shutdown flag; workers finish their in-flight URL and
    // exit, leaving PENDING rows for the next run.
    let shutdown = engine.shutdown_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", style("interrupt received, finishing in-flight fetches").yellow());
            shutdown.store(true, Ordering::SeqCst);
        }
    });

    let progress = spawn_progress(&engine);

    let outcome = engine.run().await;
    if let Some((bar, handle)) = progress {
        handle.abort();
        bar.finish_and_clear();
    }

    match outcome {
        Ok(EngineOutcome::Done) => {
            println!("{}", style("crawl complete").green());
            ExitCode::SUCCESS
        }
        Ok(EngineOutcome::Aborted) => {
            println!("{}", style("crawl aborted; resume with the same config").yellow());
            ExitCode::from(EXIT_ABORTED)
        }
        Err(e) => {
            error!(error = %e, "crawl failed");
            eprintln!("{} {}", style("fatal:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

/// Spinner showing live frontier counts, refreshed from the registry.
fn spawn_progress(
    engine: &CrawlEngine,
) -> Option<(ProgressBar, tokio::task::JoinHandle<()>)> {
    if !console::user_attended() {
        return None;
    }
    let bar = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner} {msg}").ok()?;
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(120));

    let engine = engine.clone();
    let bar_clone = bar.clone();
    let handle = tokio::spawn(async move {
        loop {
            if let Ok(counts) = engine.status_counts().await {
                let pending = counts.get("pending").copied().unwrap_or(0);
                let fetching = counts.get("fetching").copied().unwrap_or(0);
                let done: i64 = counts
                    .iter()
                    .filter(|(k, _)| *k != "pending" && *k != "fetching")
                    .map(|(_, v)| v)
                    .sum();
                bar_clone.set_message(format!(
                    "pending {pending}  in-flight {fetching}  done {done}"
                ));
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    });
    Some((bar, handle))
}

/// `export`: write JSONL/CSV files from the registry.
pub fn export(config_path: &Path) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let registry = match Registry::open(&config.output.registry_path) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{} {}", style("fatal:").red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    match Exporter::new(&registry, &config.output.export_dir).export_all() {
        Ok(files) => {
            for file in files {
                println!("wrote {}", file.display());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{} {}", style("export failed:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

/// `validate`: exit 0 when the config parses and type-checks.
pub fn validate(config_path: &Path) -> ExitCode {
    match load_config(config_path) {
        Ok(config) => {
            println!(
                "{} {} ({} allowed domain{})",
                style("valid:").green().bold(),
                config.seed_sitemap_url,
                config.allowed_domains.len(),
                if config.allowed_domains.len() == 1 { "" } else { "s" },
            );
            ExitCode::SUCCESS
        }
        Err(code) => code,
    }
}

/// `status`: page counts per status, for a quick look at a running or
/// finished crawl.
pub fn status(config_path: &Path) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let registry = match Registry::open(&config.output.registry_path) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{} {}", style("fatal:").red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    match registry.status_counts() {
        Ok(counts) => {
            let mut rows: Vec<(&String, &i64)> = counts.iter().collect();
            rows.sort();
            let total: i64 = counts.values().sum();
            for (status, count) in rows {
                println!("{:>16}  {}", status, count);
            }
            println!("{:>16}  {}", style("total").bold(), total);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{} {}", style("fatal:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
