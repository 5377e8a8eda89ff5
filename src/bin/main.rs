use std::path::Path;

use vcstore::{cli, config, telemetry};

fn main() {
    let cli = cli::parse_from(std::env::args_os());
    let _telemetry_guard = init_tracing(cli.verbose, cli.config.as_deref());

    if let Err(e) = cli::run(cli) {
        tracing::error!("error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8, config_path: Option<&Path>) -> telemetry::TelemetryGuard {
    let cfg = match config::load(config_path) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("config load failed, using defaults: {err}");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };
    telemetry::init(verbose, &cfg.logging)
}
