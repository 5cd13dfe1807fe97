mod scan;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use console::style;
use dialoguer::{Confirm, Select, theme::ColorfulTheme};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use microbit_core::details::{list_board_files, read_details};
use microbit_core::monitor::PresenceEvent;
use microbit_core::{CandidateFile, Config, MICROBIT, Manager, MountState};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, SystemTime};

#[derive(Parser)]
#[command(name = "microbit-manager")]
#[command(about = "Keeps a micro:bit mounted and flashes .hex files onto it", version)]
struct Cli {
    /// Folder to look for .hex files in [default: your Downloads folder]
    #[arg(long, global = true, value_name = "DIR")]
    downloads: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show whether a micro:bit is connected and mounted
    Status,
    /// List the .hex files available for flashing
    List,
    /// Check that a file is valid Intel HEX
    Validate {
        /// File to check
        #[arg(required = true)]
        file: PathBuf,
    },
    /// Copy a .hex file onto the micro:bit
    Flash {
        /// File to flash [default: choose from the downloads folder]
        file: Option<PathBuf>,

        /// Don't ask for confirmation
        #[arg(short = 'y', long = "yes")]
        yes: bool,
    },
    /// Mount the connected micro:bit
    Mount,
    /// Unmount the micro:bit
    Unmount,
    /// Show board details and the files on the board
    Info,
    /// Keep the micro:bit mounted while it is plugged in and out
    Watch,
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

/// Presents an interactive menu for the user to select a file.
fn select_file(files: &[CandidateFile], prompt: &str) -> Result<CandidateFile> {
    if files.is_empty() {
        return Err(anyhow!("No .hex files found."));
    }

    let items: Vec<String> = files
        .iter()
        .map(|f| {
            format!(
                "{:<40} {:>10}  {}",
                f.path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                HumanBytes(f.size).to_string(),
                format_time(f.modified)
            )
        })
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .items(&items)
        .default(0)
        .interact()?;

    Ok(files[selection].clone())
}

/// Presents a final "Yes/No" confirmation to the user.
fn confirm_operation(prompt: &str) -> Result<bool> {
    let confirmation = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(true)
        .interact()?;

    Ok(confirmation)
}

/// Prints one line describing `state`, and fails if it is a mount failure.
fn report_mount(state: &MountState) -> Result<()> {
    match state {
        MountState::Mounted(mounted) => {
            println!(
                "{} {} mounted at {}",
                style("✔").green(),
                mounted.block_path().display(),
                style(mounted.mount_point().display()).cyan()
            );
            Ok(())
        }
        MountState::Unmounted => {
            println!("micro:bit is not mounted.");
            Ok(())
        }
        MountState::MountFailed(reason) => Err(anyhow!("Could not mount the micro:bit: {reason}")),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Status => {
            let manager = Manager::system(Config::default());
            let device = manager.probe_device();
            if device.is_present() {
                println!("Device: {}", style(&device).green());
            } else {
                println!("Device: {}", style(&device).yellow());
            }
            println!("Mount:  {}", manager.mount_state());
        }
        Commands::List => {
            let dir = scan::downloads_dir(cli.downloads)?;
            let files = scan::hex_files(&dir)?;
            if files.is_empty() {
                println!("No .hex files found in {}.", dir.display());
                return Ok(());
            }

            println!("Found {} .hex files in {}:", files.len(), dir.display());
            println!(
                "\n  {:<40} {:>10}  {:<16}  {}",
                "NAME", "SIZE", "MODIFIED", "STATUS"
            );
            println!("  {:-<40} {:->10}  {:-<16}  {:-<20}", "", "", "", "");
            for file in files {
                let status = match microbit_core::hex::validate(&file.path) {
                    Ok(_) => style("valid".to_string()).green(),
                    Err(e) => style(e.to_string()).red(),
                };
                println!(
                    "  {:<40} {:>10}  {:<16}  {}",
                    file.path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default(),
                    HumanBytes(file.size).to_string(),
                    format_time(file.modified),
                    status
                );
            }
        }
        Commands::Validate { file } => match microbit_core::hex::validate(&file) {
            Ok(summary) => {
                println!(
                    "{} {} is valid Intel HEX.",
                    style("✔").green(),
                    style(file.display()).cyan()
                );
                println!("  Records:    {}", summary.records);
                println!("  Data bytes: {}", summary.data_bytes);
                if summary.universal {
                    println!("  Format:     Universal Hex (micro:bit V1 and V2)");
                }
            }
            Err(e) => return Err(anyhow!("{} is not valid: {e}", file.display())),
        },
        Commands::Flash { file, yes } => {
            let manager = Manager::system(Config::default());

            let candidate = match file {
                Some(path) => CandidateFile::from_path(&path)
                    .with_context(|| format!("Failed to open {}", path.display()))?,
                None => {
                    let dir = scan::downloads_dir(cli.downloads)?;
                    let files = scan::hex_files(&dir)?;
                    select_file(&files, "Select the file to flash")?
                }
            };

            let summary = manager
                .validate_file(&candidate.path)
                .map_err(|e| anyhow!("{} is not valid: {e}", candidate.path.display()))?;

            let state = manager.mount()?;
            report_mount(&state)?;
            let Some(mounted) = state.mounted() else {
                return Err(anyhow!("The micro:bit is not mounted."));
            };

            println!("  File:  {}", style(candidate.path.display()).cyan());
            println!(
                "  Size:  {} ({} data bytes)",
                HumanBytes(candidate.size),
                summary.data_bytes
            );
            println!("  Board: {}", style(mounted.mount_point().display()).cyan());
            println!();

            if !yes && !confirm_operation("Flash this file?")? {
                println!("Flash cancelled.");
                return Ok(());
            }

            let bar_style = ProgressStyle::default_bar()
                .template(
                    "{prefix:12} [{elapsed_precise}] [{bar:40.green/black}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
                )?
                .progress_chars("■ ");
            let copy_pb = ProgressBar::new(0);

            let on_copy_start = |len| {
                copy_pb.set_length(len);
                copy_pb.set_prefix("Copying");
                copy_pb.set_style(bar_style.clone());
            };
            let on_copy_progress = |bytes| copy_pb.set_position(bytes);

            match manager.transfer_file_with_progress(&candidate, on_copy_start, on_copy_progress)
            {
                Ok(written) => {
                    copy_pb.finish_with_message("Copy complete.");
                    println!(
                        "\n✨ Flashed {} ({}) onto the micro:bit.",
                        style(candidate.path.display()).cyan(),
                        HumanBytes(written)
                    );
                    println!("The board restarts by itself once it has taken the program.");
                }
                Err(e) => {
                    copy_pb.finish_with_message("❌ Operation failed.");
                    return Err(e.into());
                }
            }
        }
        Commands::Mount => {
            let manager = Manager::system(Config::default());
            report_mount(&manager.mount()?)?;
        }
        Commands::Unmount => {
            let manager = Manager::system(Config::default());
            manager.unmount()?;
            println!("{} micro:bit unmounted.", style("✔").green());
        }
        Commands::Info => {
            let manager = Manager::system(Config::default());
            let mut state = manager.mount_state();
            if !state.is_mounted() {
                state = manager.mount()?;
            }
            report_mount(&state)?;
            let Some(mounted) = state.mounted() else {
                return Err(anyhow!("The micro:bit is not mounted."));
            };

            let details = read_details(mounted.mount_point())?;
            println!();
            if let Some(revision) = details.board_revision() {
                println!("  {:<20} {}", "Board revision", style(revision).cyan());
            }
            for (key, value) in details.entries() {
                println!("  {key:<20} {value}");
            }

            let files = list_board_files(mounted.mount_point())?;
            println!("\nFiles on the micro:bit:");
            println!("\n  {:<24} {:>10}  {}", "NAME", "SIZE", "MODIFIED");
            println!("  {:-<24} {:->10}  {:-<16}", "", "", "");
            for file in files {
                println!(
                    "  {:<24} {:>10}  {}",
                    file.name,
                    file.size
                        .map(|s| HumanBytes(s).to_string())
                        .unwrap_or_else(|| "?".to_string()),
                    file.modified.map(format_time).unwrap_or_default()
                );
            }
        }
        Commands::Watch => {
            // This flag allows for graceful shutdown of the monitor.
            let running = Arc::new(AtomicBool::new(true));
            let r = running.clone();

            // Set up the Ctrl+C handler to toggle the `running` flag.
            ctrlc::set_handler(move || {
                r.store(false, Ordering::SeqCst);
            })?;

            let mut manager = Manager::system(Config::default());
            manager.start_monitor()?;
            println!(
                "Watching for a micro:bit ({}). Press Ctrl+C to stop.",
                style(MICROBIT).cyan()
            );

            let mut seen = 0;
            while running.load(Ordering::SeqCst) {
                let status = manager.status();
                if status.event_count != seen {
                    seen = status.event_count;
                    let now = Local::now().format("%H:%M:%S");
                    match status.last_event {
                        Some(PresenceEvent::Attached) => println!(
                            "[{now}] {} {}",
                            style("connected:").green().bold(),
                            status.mount
                        ),
                        Some(PresenceEvent::Detached) => {
                            println!("[{now}] {}", style("disconnected").yellow().bold())
                        }
                        None => {}
                    }
                }
                thread::sleep(Duration::from_millis(200));
            }

            println!("\nStopping...");
            manager.stop_monitor();
            match manager.unmount() {
                Ok(_) => println!("{} micro:bit unmounted.", style("✔").green()),
                Err(e) => eprintln!("{} {e}", style("WARNING:").red().bold()),
            }
        }
    }

    Ok(())
}
