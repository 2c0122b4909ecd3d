//! Config validation CLI tool
//!
//! Validates a scrollwatch configuration file and reports any errors.

use scrollwatch_util::default_config_path;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a scrollwatch configuration file.");
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match scrollwatch_config::load_config(&config_path) {
        Ok(policy) => {
            let engine = &policy.service.engine;
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", scrollwatch_config::CURRENT_CONFIG_VERSION);
            println!("  Flush interval: {}s", engine.flush_interval.as_secs());
            println!("  Sweep interval: {}s", engine.sweep_interval.as_secs());
            println!(
                "  Tick spacing / cap: {}ms / {}s",
                engine.min_tick_spacing.as_millis(),
                engine.max_tick_elapsed.as_secs()
            );
            println!("  Rules: {}", policy.rules.len());

            if !policy.rules.is_empty() {
                println!();
                println!("Rules:");
                for rule in &policy.rules {
                    println!(
                        "  - {} [{}]: {}s every {}s",
                        rule.domain,
                        rule.config.mode,
                        rule.config.allowed_duration,
                        rule.config.reset_interval
                    );
                }
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                scrollwatch_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                scrollwatch_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                scrollwatch_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                scrollwatch_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        scrollwatch_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
