mod hopper;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "hopper",
    version,
    about = "Hopper - hostname-routing Minecraft reverse proxy",
    disable_version_flag = true
)]
struct Cli {
    /// Path to the YAML config file. The HOPPER_CONFIG environment variable may carry the entire config body inline, overriding this path.
    #[arg(short = 'c', long = "config", default_value = "config.yml")]
    config: std::path::PathBuf,

    /// Print version and exit.
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    hopper::run(cli.config).await
}
