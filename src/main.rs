// src/main.rs

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use dpms::install::Inconsistency;
use dpms::progress::{ProgressEvent, ProgressObserver, Stage};
use dpms::{Config, Error, InstallEngine};
use indicatif::{ProgressBar, ProgressStyle};
use std::cell::RefCell;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

#[derive(Parser)]
#[command(name = "dpms")]
#[command(author, version, about = "Discovery Package Manager", long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.dpms/config.toml)
    #[arg(long, global = true, env = "DPMS_CONFIG")]
    config: Option<PathBuf>,

    /// Override the install root from the configuration
    #[arg(long, global = true, env = "DPMS_INSTALL_ROOT")]
    install_root: Option<PathBuf>,

    /// Answer yes to confirmation prompts
    #[arg(short, long, global = true)]
    yes: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Install packages by name, archive path or URL
    Install {
        /// Package names, archive paths or URLs
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Uninstall packages
    #[command(visible_alias = "remove")]
    Uninstall {
        /// Package names
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// List installed packages
    List,
    /// List packages available for install
    Installable {
        /// Query the remote repository instead of the local package directory
        #[arg(long)]
        remote: bool,
    },
    /// Search installed and installable packages
    Search {
        /// Case-insensitive substring
        query: String,
    },
    /// Show details of an installed package
    Info {
        /// Package name
        name: String,
    },
    /// Download every remote package into the package directory
    Sync,
    /// Build a tar.gz or tar.xz archive from a file or directory
    Compress {
        /// File or directory to archive
        source: PathBuf,
        /// Output path without extension
        output: PathBuf,
        /// Compression type (gz or xz)
        #[arg(short, long, default_value = "gz")]
        compression: String,
    },
    /// Download a file
    Download {
        /// URL to fetch
        url: String,
        /// Destination path
        output: PathBuf,
    },
    /// Compare the registry with the install root
    Check,
    /// Print the effective configuration
    Config {
        /// Also write it to the configuration file
        #[arg(long)]
        save: bool,
    },
    /// Remove the download cache and the configuration file
    Reset,
    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

/// Renders progress events as terminal progress bars, one bar per stage
#[derive(Default)]
struct TerminalProgress {
    current: RefCell<Option<(Stage, ProgressBar)>>,
}

impl TerminalProgress {
    fn new_bar(event: &ProgressEvent) -> ProgressBar {
        let (bar, template) = match (event.stage, event.total) {
            (Stage::Download, Some(total)) => (
                ProgressBar::new(total),
                "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            ),
            (_, Some(total)) => (ProgressBar::new(total), "{msg} [{bar:40.cyan/blue}] {pos}/{len}"),
            (Stage::Download, None) => (ProgressBar::new_spinner(), "{spinner:.green} {msg} {bytes}"),
            (_, None) => (ProgressBar::new_spinner(), "{spinner:.green} {msg} {pos}"),
        };

        if let Ok(style) = ProgressStyle::default_bar().template(template) {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_message(match event.stage {
            Stage::Download => "Downloading",
            Stage::Extract => "Extracting",
            Stage::Compress => "Compressing",
        });
        bar
    }
}

impl ProgressObserver for TerminalProgress {
    fn on_progress(&self, event: ProgressEvent) {
        let mut current = self.current.borrow_mut();
        let stale = !matches!(current.as_ref(), Some((stage, _)) if *stage == event.stage);
        if stale {
            if let Some((_, old)) = current.take() {
                old.finish_and_clear();
            }
            *current = Some((event.stage, Self::new_bar(&event)));
        }

        if let Some((_, bar)) = current.as_ref() {
            if let Some(total) = event.total {
                bar.set_length(total);
            }
            bar.set_position(event.current);
        }
    }

    fn on_finish(&self, stage: Stage) {
        let mut current = self.current.borrow_mut();
        if matches!(current.as_ref(), Some((s, _)) if *s == stage) {
            if let Some((_, bar)) = current.take() {
                bar.finish_and_clear();
            }
        }
    }
}

fn load_config(cli: &Cli) -> Result<(Config, Option<PathBuf>)> {
    let path = cli.config.clone().or_else(Config::default_path);

    let mut config = match &path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(root) = &cli.install_root {
        config.set_install_root(root);
    }

    Ok((config, path))
}

/// Ask a yes/no question on stdin; anything but y/yes declines
fn confirm(prompt: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }

    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing subscriber for logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if let Some(Error::SubprocessError {
                stdout,
                stderr,
                status,
                ..
            }) = e.downcast_ref::<Error>()
            {
                if let Some(status) = status {
                    eprintln!("  Exit status: {}", status);
                }
                if let Some(stdout) = stdout.as_deref().filter(|s| !s.trim().is_empty()) {
                    eprintln!("  Stdout: {}", stdout.trim());
                }
                if let Some(stderr) = stderr.as_deref().filter(|s| !s.trim().is_empty()) {
                    eprintln!("  Stderr: {}", stderr.trim());
                }
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let Some(command) = &cli.command else {
        println!("DPMS v{}", env!("CARGO_PKG_VERSION"));
        println!("Run 'dpms --help' for usage information");
        return Ok(());
    };

    if let Commands::Completions { shell } = command {
        clap_complete::generate(*shell, &mut Cli::command(), "dpms", &mut io::stdout());
        return Ok(());
    }

    let (config, config_path) = load_config(&cli)?;
    let progress = TerminalProgress::default();

    match command {
        Commands::Install { packages } => {
            let prompt = format!("Install {}?", packages.join(", "));
            if !confirm(&prompt, cli.yes)? {
                println!("Aborted.");
                return Ok(());
            }

            let engine = InstallEngine::new(config)?;
            for package in packages {
                let report = engine
                    .install(package, Some(&progress))
                    .with_context(|| format!("Failed to install {}", package))?;

                println!("Installed package: {} version {}", report.name, report.version);
                println!("  Location: {}", report.install_dir.display());
                println!("  Format: {}", report.format.as_str());
                if !report.newly_registered {
                    println!("  (already registered, files refreshed)");
                }
            }
        }
        Commands::Uninstall { packages } => {
            let prompt = format!("Uninstall {}?", packages.join(", "));
            if !confirm(&prompt, cli.yes)? {
                println!("Aborted.");
                return Ok(());
            }

            let engine = InstallEngine::new(config)?;
            for package in packages {
                let report = engine
                    .uninstall(package)
                    .with_context(|| format!("Failed to uninstall {}", package))?;

                if report.directory_removed || report.registry_entries_removed > 0 {
                    println!("Removed package: {}", report.name);
                    if report.directory_removed {
                        println!("  Directory removed: {}", report.install_dir.display());
                    }
                } else {
                    println!("Package '{}' is not installed.", report.name);
                }
            }
        }
        Commands::List => {
            let engine = InstallEngine::new(config)?;
            let installed = engine.list_installed()?;
            if installed.is_empty() {
                println!("No packages installed.");
            } else {
                println!("Installed packages:");
                for name in &installed {
                    println!("  {}", name);
                }
                println!("\nTotal: {} package(s)", installed.len());
            }
        }
        Commands::Installable { remote } => {
            let engine = InstallEngine::new(config)?;
            if *remote {
                let packages = engine.list_remote()?;
                if packages.is_empty() {
                    println!("No remote packages found.");
                }
                for package in &packages {
                    println!("  {}", package.name);
                }
            } else {
                let packages = engine.list_installable()?;
                if packages.is_empty() {
                    println!(
                        "No packages found in {}",
                        engine.config().package_dir.display()
                    );
                }
                for package in &packages {
                    match (&package.name, &package.version) {
                        (Some(name), Some(version)) => {
                            println!("  {} ({} {})", package.file_name, name, version)
                        }
                        _ => println!("  {}", package.file_name),
                    }
                }
            }
        }
        Commands::Search { query } => {
            let engine = InstallEngine::new(config)?;
            let results = engine.search(query)?;
            if results.is_empty() {
                println!("No packages matching '{}'.", query);
            }
            if !results.installed.is_empty() {
                println!("Installed:");
                for name in &results.installed {
                    println!("  {}", name);
                }
            }
            if !results.installable.is_empty() {
                println!("Installable:");
                for name in &results.installable {
                    println!("  {}", name);
                }
            }
        }
        Commands::Info { name } => {
            let engine = InstallEngine::new(config)?;
            let Some(info) = engine.package_info(name)? else {
                println!("Package '{}' is not installed.", name);
                return Ok(());
            };

            println!("Package: {}", info.name);
            println!("  Location: {}", info.install_dir.display());
            if !info.directory_exists {
                println!("  (install directory is missing)");
            }
            if let Some(metadata) = &info.metadata {
                for (key, value) in metadata {
                    match value.as_str() {
                        Some(text) => println!("  {}: {}", key, text),
                        None => println!("  {}: {}", key, value),
                    }
                }
            }
        }
        Commands::Sync => {
            let engine = InstallEngine::new(config)?;
            let fetched = engine.sync_remote(Some(&progress))?;
            println!(
                "Fetched {} package(s) into {}",
                fetched.len(),
                engine.config().package_dir.display()
            );
        }
        Commands::Compress {
            source,
            output,
            compression,
        } => {
            let engine = InstallEngine::new(config)?;
            let archive = engine.compress(source, output, compression, Some(&progress))?;
            println!("Created {}", archive.display());
        }
        Commands::Download { url, output } => {
            let engine = InstallEngine::new(config)?;
            let bytes = engine.download(url, output, Some(&progress))?;
            println!("Downloaded {} bytes to {}", bytes, output.display());
        }
        Commands::Check => {
            let engine = InstallEngine::new(config)?;
            let issues = engine.check_consistency()?;
            if issues.is_empty() {
                println!("Registry and install root agree.");
            }
            for issue in &issues {
                match issue {
                    Inconsistency::MissingDirectory(name) => {
                        println!("  {}: registered but its directory is missing", name)
                    }
                    Inconsistency::UnregisteredDirectory(dir) => {
                        println!("  {}: directory present but not registered", dir)
                    }
                }
            }
        }
        Commands::Config { save } => {
            print!("{}", config.to_toml().context("Failed to render configuration")?);
            if *save {
                let path = config_path.context("No configuration path available")?;
                config.save(&path)?;
                info!("Saved configuration to {}", path.display());
            }
        }
        Commands::Reset => {
            if !confirm("Remove the download cache and configuration file?", cli.yes)? {
                println!("Aborted.");
                return Ok(());
            }
            let removed = config.reset(config_path.as_deref())?;
            if removed {
                println!("Configuration reset.");
            } else {
                println!("Nothing to reset.");
            }
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
