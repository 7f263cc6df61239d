use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use webrtc_patcher::config::DEFAULT_TARGET_SYMBOL;

#[derive(Parser)]
#[command(name = "webrtc-patcher")]
#[command(about = "Diagnostics for the XComposite/EGL WebRTC window capturer")]
#[command(version)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// X display to connect to (defaults to $DISPLAY)
    #[arg(long, global = true)]
    pub display: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the file offset of a symbol in a library's static symbol table
    Resolve {
        /// ELF shared object to inspect
        library: PathBuf,

        /// Mangled symbol name
        #[arg(long, default_value = DEFAULT_TARGET_SYMBOL)]
        symbol: String,
    },

    /// List top-level windows
    List,

    /// Capture frames of a window and save the last one as PNG
    Capture {
        /// Window ID to capture
        #[arg(long)]
        window: u32,

        /// Output PNG path; a JSON sidecar is written next to it
        #[arg(short, long)]
        output: PathBuf,

        /// Number of frames to capture
        #[arg(long, default_value_t = 1)]
        frames: u32,
    },

    /// Capture a window repeatedly until Ctrl+C
    Watch {
        /// Window ID to capture
        #[arg(long)]
        window: u32,

        /// Delay between captures
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },

    /// Print the configuration the module would use when loaded from PATH
    Config {
        /// Path of the interposer module
        #[arg(default_value = "discord_voice.node")]
        module: PathBuf,
    },
}

impl Cli {
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
