use crate::Environment;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, prelude::*};

/// Install color-eyre with a project-standard configuration.
///
/// Call this early in main() before any fallible operations. Safe to call
/// multiple times.
pub fn install_color_eyre() {
    let _ = color_eyre::config::HookBuilder::default()
        .display_location_section(true)
        .display_env_section(false)
        .install();
}

/// Initialize tracing with environment-aware formatting and error span capture.
///
/// - **Production** (`APP_ENV=production`): JSON, one flat object per event
/// - **Development** (default): pretty-printed
///
/// `RUST_LOG` overrides the filter; otherwise `default_level` (e.g. the
/// worker's `LOG_LEVEL`, case-insensitive) applies. An unparseable level
/// falls back to `info`.
///
/// Safe to call multiple times; later calls are ignored.
pub fn init_tracing(environment: &Environment, default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(default_level.trim().to_ascii_lowercase())
            .unwrap_or_else(|_| EnvFilter::new("info"))
    });

    let result = if environment.is_production() {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .flatten_event(true),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false)
                    .pretty(),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    };

    match result {
        Ok(_) => info!(environment = ?environment, "Tracing initialized"),
        Err(_) => debug!("Tracing already initialized, skipping re-initialization"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_development() {
        init_tracing(&Environment::Development, "INFO");
    }

    #[test]
    fn test_init_tracing_production() {
        init_tracing(&Environment::Production, "warn");
    }

    #[test]
    fn test_init_tracing_multiple_calls() {
        let env = Environment::Development;
        init_tracing(&env, "debug");
        init_tracing(&env, "debug");
    }

    #[test]
    fn test_init_tracing_with_bad_level() {
        temp_env::with_var_unset("RUST_LOG", || {
            init_tracing(&Environment::Development, "not-a-level!!");
        });
    }

    #[test]
    fn test_init_tracing_with_rust_log_env() {
        temp_env::with_var("RUST_LOG", Some("trace"), || {
            init_tracing(&Environment::Production, "info");
        });
    }
}
