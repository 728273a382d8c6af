//! Main entry point for the aps-extract CLI application.
//!
//! This binary lists and extracts entries of remote composite-design
//! archives, and resolves or downloads the resources of derivative manifests.

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use aps_extract::Cli;
use aps_extract::archive::ArchiveEntryRecord;
use aps_extract::cli::Command;
use aps_extract::composite::{ArchiveSource, CompositeDesignResolver};
use aps_extract::config::ClientConfig;
use aps_extract::derivative::{
    HttpDerivativeSource, ManifestResourceResolver, Resolution, ResourceDownloader,
};

/// Application entry point.
///
/// Parses command-line arguments, installs logging, and dispatches to the
/// handler of the selected subcommand.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.is_quiet());

    let config = cli.client_config()?;
    let client = config.http_client()?;
    let token = cli.global.token.clone();

    match &cli.command {
        Command::List {
            source,
            verbose,
            json,
        } => {
            let source = ArchiveSource::parse(source);
            let credential = credential_for(&source, token.as_deref())?;
            let resolver = CompositeDesignResolver::new(&config, client);

            let entries = resolver.list_contents(&source, credential).await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                list_entries(&entries, *verbose);
            }
            report_transfer(&resolver, cli.is_quiet());
        }
        Command::Extract {
            source,
            entry,
            extract_dir,
            pipe,
        } => {
            let source = ArchiveSource::parse(source);
            let credential = credential_for(&source, token.as_deref())?;
            let resolver = CompositeDesignResolver::new(&config, client);

            if *pipe {
                let mut stdout = tokio::io::stdout();
                resolver
                    .extract_to_writer(&source, credential, entry, &mut stdout)
                    .await?;
            } else {
                let extracted = resolver
                    .extract_file(&source, credential, entry, extract_dir)
                    .await?;
                if !cli.is_quiet() {
                    if extracted.skipped {
                        eprintln!("Skipping: {} (file exists)", extracted.path.display());
                    } else {
                        println!("  extracting: {}", extracted.path.display());
                    }
                }
            }
            report_transfer(&resolver, cli.is_quiet());
        }
        Command::Resources { urn, json } => {
            let resolver = derivative_resolver(&config, client, token)?;
            let resolution = resolver.resolve(urn).await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&resolution)?);
            } else {
                print_resolution(&resolution);
            }
        }
        Command::Download { urn, output_dir } => {
            let resolver = derivative_resolver(&config, client, token)?;
            let resolution = resolver.resolve(urn).await?;

            let downloader = ResourceDownloader::new(
                resolver.source().clone(),
                output_dir.clone(),
                config.max_concurrency,
            );
            downloader.save_manifest(urn).await?;
            let report = downloader.download_all(urn, &resolution.resources).await;

            if !cli.is_quiet() {
                println!(
                    "{} saved, {} skipped, {} failed",
                    report.saved.len(),
                    report.skipped.len(),
                    report.failures.len() + resolution.failures.len()
                );
            }
            for failure in &resolution.failures {
                eprintln!("unresolved: {} ({})", failure.urn, failure.reason);
            }
            for failure in &report.failures {
                eprintln!("failed: {} ({})", failure.local_path, failure.reason);
            }
        }
    }

    Ok(())
}

fn init_tracing(quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,aps_extract=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Object identifiers need a token; direct URLs carry their own signature.
fn credential_for<'t>(source: &ArchiveSource, token: Option<&'t str>) -> Result<&'t str> {
    match source {
        ArchiveSource::Object(_) => token.context("an access token is required (--token or APS_ACCESS_TOKEN)"),
        ArchiveSource::Url(_) => Ok(token.unwrap_or_default()),
    }
}

fn derivative_resolver(
    config: &ClientConfig,
    client: reqwest::Client,
    token: Option<String>,
) -> Result<ManifestResourceResolver<HttpDerivativeSource>> {
    let token = token.context("an access token is required (--token or APS_ACCESS_TOKEN)")?;
    let source = HttpDerivativeSource::new(client, config.api_url.clone(), token);
    Ok(ManifestResourceResolver::new(source, config.max_concurrency))
}

/// List archive entries.
///
/// Supports two output formats:
/// - Simple format: just entry names, one per line
/// - Verbose format (`-v`): table with size, compression ratio, and timestamps
fn list_entries(entries: &[ArchiveEntryRecord], verbose: bool) {
    if !verbose {
        for entry in entries {
            println!("{}", entry.name);
        }
        return;
    }

    println!(
        "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
        "Length", "Size", "Cmpr", "Date", "Time"
    );
    println!("{}", "-".repeat(70));

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in entries {
        let (year, month, day) = entry.mod_date();
        let (hour, minute, _second) = entry.mod_time();

        println!(
            "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {}",
            entry.uncompressed_size,
            entry.compressed_size,
            ratio(entry.compressed_size, entry.uncompressed_size),
            year,
            month,
            day,
            hour,
            minute,
            entry.name
        );

        if !entry.is_directory {
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
    }

    println!("{}", "-".repeat(70));
    println!(
        "{:>10}  {:>10}  {}  {:>21}  {} files",
        total_uncompressed,
        total_compressed,
        ratio(total_compressed, total_uncompressed),
        "",
        file_count
    );
}

/// Compression ratio as percentage saved.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed > 0 && compressed <= uncompressed {
        format!("{:>4}%", 100 - (compressed * 100 / uncompressed))
    } else {
        "  0%".to_string()
    }
}

fn print_resolution(resolution: &Resolution) {
    for resource in &resolution.resources {
        println!("{}\t{}", resource.local_path, resource.remote_path);
    }
    for failure in &resolution.failures {
        eprintln!(
            "unresolved: {} {} ({})",
            failure.guid.as_deref().unwrap_or("-"),
            failure.urn,
            failure.reason
        );
    }
}

/// Display network transfer statistics.
fn report_transfer(resolver: &CompositeDesignResolver, quiet: bool) {
    if !quiet {
        let transferred = resolver.fetcher().transferred_bytes();
        eprintln!("\nTotal bytes transferred: {}", format_size(transferred));
    }
}

/// Format a byte size into a human-readable string.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(format_size(500), "500 bytes");
/// assert_eq!(format_size(1536), "1.50 KB");
/// assert_eq!(format_size(1048576), "1.00 MB");
/// ```
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
