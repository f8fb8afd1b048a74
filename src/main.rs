#[macro_use]
extern crate log;
pub const CRATE_NAME: &str = module_path!();
mod bot;
mod callback;
mod config;
mod database;
mod logger;
mod misc;
mod quest;
mod web;

use config::Config;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    misc::boot(&config);
    bot::run(config).await;
}
