//! `dockhand serve`

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::gateway::ProcessTool;
use crate::hub::auth::generate_key;
use crate::hub::{server, AppState};

/// Session key from configuration, or a fresh one when none is set.
///
/// Returns the key and whether it was generated.
pub fn resolve_key(config: &Config) -> (String, bool) {
    match config.server.auth_key.as_deref() {
        Some(key) if !key.is_empty() => (key.to_string(), false),
        _ => (generate_key(), true),
    }
}

/// Run the server until interrupted.
///
/// # Arguments
///
/// * `config` - Validated configuration with CLI overrides applied
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.
pub async fn run_serve(config: Config) -> Result<()> {
    let (key, generated) = resolve_key(&config);
    if generated {
        tracing::warn!(key = %key, "no session key configured; generated one for this run");
    } else {
        tracing::info!("using configured session key");
    }
    tracing::info!(
        runtime = %config.container.runtime,
        image = %config.container.image,
        "container settings"
    );

    let state = AppState::build(config, Arc::new(ProcessTool::new()), &key);
    server::serve(state).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_key_prefers_config() {
        let mut config = Config::default();
        config.server.auth_key = Some("configured-key".to_string());
        assert_eq!(resolve_key(&config), ("configured-key".to_string(), false));
    }

    #[test]
    fn test_resolve_key_generates_when_unset() {
        let (key, generated) = resolve_key(&Config::default());
        assert!(generated);
        assert_eq!(key.len(), 32);
    }
}
