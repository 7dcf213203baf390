use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fsbuild", about = "Firmware Filesystem image builder")]
pub struct Cli {
    /// Source configuration file
    #[arg(short = 'i', long = "input", value_name = "filename")]
    pub input: PathBuf,

    /// Destination image file
    #[arg(short = 'o', long = "output", value_name = "filename")]
    pub output: PathBuf,

    /// Create a file layout for inspection
    #[arg(short = 'f', long = "files", value_name = "directory")]
    pub files: Option<PathBuf>,

    /// Create a build log file, use `-` to print to screen
    #[arg(short = 'l', long = "log", value_name = "filename")]
    pub log: Option<String>,

    /// Show build details
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Disable JSON/JS minification
    #[arg(short = 'n', long = "no-minify")]
    pub no_minify: bool,
}
