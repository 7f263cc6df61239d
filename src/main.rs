mod cli;
mod metadata;
mod recorder;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::time::Duration;
use webrtc_patcher::config::PatcherConfig;
use webrtc_patcher::interpose::resolve_symbol;
use webrtc_patcher::linux::{list_windows, X11Composite};
use webrtc_patcher::logging;

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_cli_logging(cli.log_filter())?;
    let display = cli.display.as_deref();

    match cli.command {
        Commands::Resolve { library, symbol } => match resolve_symbol(&library, &symbol)? {
            Some(offset) => println!("{offset:#x}"),
            None => anyhow::bail!("{symbol} not found in {}", library.display()),
        },
        Commands::List => {
            let server = X11Composite::connect(display)?;
            let windows = list_windows(server.connection(), server.screen())?;
            if windows.is_empty() {
                println!("No windows found.");
            } else {
                println!("Available windows:");
                for w in windows {
                    println!(
                        "  [{id:#x}] {class} - {title} ({width}x{height})",
                        id = w.id,
                        class = w.class,
                        title = if w.title.is_empty() { "(untitled)" } else { &w.title },
                        width = w.width,
                        height = w.height,
                    );
                }
            }
        }
        Commands::Capture {
            window,
            output,
            frames,
        } => {
            recorder::capture_window(display, window, &output, frames)?;
        }
        Commands::Watch {
            window,
            interval_ms,
        } => {
            recorder::watch_window(display, window, Duration::from_millis(interval_ms))?;
        }
        Commands::Config { module } => {
            let config = PatcherConfig::from_env(&module);
            let json =
                serde_json::to_string_pretty(&config).context("Failed to serialize config")?;
            println!("{json}");
        }
    }

    Ok(())
}
