//! Config command implementation.

use super::session::Session;
use std::path::Path;
use tvhsync_engine::EngineConfig;

/// Runs the config command.
pub fn run(session: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = match session {
        Some(path) => Session::load(path)?.config,
        None => EngineConfig::default(),
    };
    print!("{}", render(&config));
    Ok(())
}

fn render(config: &EngineConfig) -> String {
    let rows = [
        ("auth_timeout", format!("{:?}", config.auth_timeout)),
        ("request_timeout", format!("{:?}", config.request_timeout)),
        ("batch_timeout", format!("{:?}", config.batch_timeout)),
        ("worker_threads", config.worker_threads.to_string()),
        ("epg_window", format!("{:?}", config.epg_window)),
        ("updates_since", format!("{:?}", config.updates_since)),
        ("event_retention", format!("{:?}", config.event_retention)),
        ("incremental_delay", format!("{:?}", config.incremental_delay)),
        ("incremental_events", config.incremental_event_count.to_string()),
        ("icon_dir", config.icon_dir.display().to_string()),
        ("icon_size", format!("{}px", config.icon_target_size())),
        ("client", format!("{} {}", config.client_name, config.client_version)),
        ("htsp_version", config.htsp_version.to_string()),
    ];
    rows.iter()
        .map(|(name, value)| format!("{name:<20} {value}\n"))
        .collect()
}
