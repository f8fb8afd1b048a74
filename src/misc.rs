use crate::config::Config;
use crate::logger;

pub fn boot(config: &Config) {
    if let Err(e) = logger::init(&config.log_file, config.log_level) {
        eprintln!(
            "Can't initialize logging to {}: {}",
            config.log_file.display(),
            e
        );
        std::process::exit(1);
    }

    if let Err(e) = ctrlc::set_handler(move || {
        info!("Stopping ...");
        std::process::exit(0);
    }) {
        warn!("Can't install the Ctrl-C handler: {}", e);
    }

    debug!(
        "Database: {}, web port: {}, admins: {}, mode: {}",
        config.db_path.display(),
        config.port,
        config.admins.len(),
        if config.webhook { "webhook" } else { "polling" }
    );
}
