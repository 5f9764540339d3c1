use log::error;
use snafu::ErrorCompat;

mod poll;

/// Environment variable naming the configuration file.
const CONFIG_ENV: &str = "VOTA_FACIL_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "vota_facil.json";

fn main() {
    env_logger::init();

    let config_path =
        std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    if let Err(e) = poll::run_app(config_path) {
        error!("Error occured {:?}", e);
        eprintln!("An error occured: {}", e);
        if let Some(bt) = ErrorCompat::backtrace(&e) {
            eprintln!("trace: {}", bt);
        }
        std::process::exit(1);
    }
}
