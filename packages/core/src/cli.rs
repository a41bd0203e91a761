use clap::Parser;

/// Pharmacy locator CLI arguments. Each flag overrides its environment
/// variable.
#[derive(Debug, Parser)]
#[command(
    name = "pharmacy-locator",
    version,
    about = "Find nearby pharmacies that stock a drug, and keep their inventory honest"
)]
pub struct Cli {
    /// SQLite database URL
    #[arg(long)]
    pub database_url: Option<String>,

    /// Address the HTTP server binds to
    #[arg(long)]
    pub bind: Option<String>,

    /// Alert sweep interval in seconds
    #[arg(long)]
    pub sweep_interval: Option<u64>,
}
