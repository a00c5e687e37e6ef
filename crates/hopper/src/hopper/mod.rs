pub mod app;
pub mod codec;
pub mod config;
pub mod connection;
pub mod logging;
pub mod net;
pub mod packet;
pub mod preamble;
pub mod resolver;
pub mod route;
pub mod server;

pub async fn run(config_path: std::path::PathBuf) -> anyhow::Result<()> {
    app::run(config_path).await
}
