use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address to listen on, overriding `server.bind`
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Configuration file layered over the built-in defaults
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(short, long, default_value = "false")]
    pub debug: bool,
}
