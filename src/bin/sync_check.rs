use std::collections::HashMap;
use std::process::ExitCode;

use agenda_notify::config::{AppConfig, default_config_path};
use agenda_notify::core::notification::ScheduledNotificationInfo;
use agenda_notify::notify::SyncStateStore;
use agenda_notify::notify::scheduler::load_saved;
use agenda_notify::sync::{ServerRegistry, default_store};

fn when(info: &ScheduledNotificationInfo) -> String {
    info.scheduled_time
        .with_timezone(&chrono::Local)
        .format("%a %d %b %H:%M")
        .to_string()
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match AppConfig::load(&default_config_path()) {
        Ok(c) => c,
        Err(e) => {
            println!("Failed to load config: {}", e);
            return ExitCode::FAILURE;
        }
    };
    agenda_notify::logging::init("agenda-notify-sync-check", config.debug_logging);

    println!("=== Server vs Scheduled Reminders ===\n");

    let local = match load_saved(&config.scheduled_path()) {
        Ok(l) => l,
        Err(e) => {
            println!("Failed to read {}: {}", config.scheduled_path().display(), e);
            return ExitCode::FAILURE;
        }
    };
    let horizon = SyncStateStore::load(&config.sync_state_path()).horizon();
    println!("Local: {} scheduled reminders (horizon {})\n", local.len(), horizon);

    let store = default_store(&config.secrets_path());
    let registry = match ServerRegistry::load(&config.servers_path()) {
        Ok(r) => r,
        Err(e) => {
            println!("Failed to read servers: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let Some(server) = registry.active() else {
        println!("No active server configured.");
        return ExitCode::FAILURE;
    };
    println!("--- Server: {} ---", server.display_name());

    let client = match registry.active_client(&store).await {
        Ok(c) => c,
        Err(e) => {
            println!("  Client error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let remote = match client.get_notifications(horizon.days()).await {
        Ok(r) => r,
        Err(e) => {
            println!("  Error fetching notifications: {}", e);
            return ExitCode::FAILURE;
        }
    };
    println!("  Remote: {} notifications", remote.len());

    let now = chrono::Utc::now();
    let local_by_id: HashMap<&str, &ScheduledNotificationInfo> =
        local.iter().map(|i| (i.identifier.as_str(), i)).collect();

    let mut matched = 0;
    let mut content_mismatch = Vec::new();
    let mut remote_only = Vec::new();
    let mut past = 0;

    let remote_infos: Vec<ScheduledNotificationInfo> =
        remote.iter().map(|n| n.to_scheduled()).collect();
    for info in &remote_infos {
        if info.scheduled_time <= now {
            past += 1;
            continue;
        }
        match local_by_id.get(info.identifier.as_str()) {
            Some(l) if l.same_content(info) => matched += 1,
            Some(l) => content_mismatch.push((*l, info)),
            None => remote_only.push(info),
        }
    }

    let remote_ids: std::collections::HashSet<&str> =
        remote_infos.iter().map(|i| i.identifier.as_str()).collect();
    let local_only: Vec<&ScheduledNotificationInfo> = local
        .iter()
        .filter(|i| !remote_ids.contains(i.identifier.as_str()))
        .collect();

    println!("  Matched: {}", matched);
    if past > 0 {
        println!("  Already past: {}", past);
    }

    if !content_mismatch.is_empty() {
        println!("\n  CONTENT MISMATCHES:");
        for (l, r) in &content_mismatch {
            println!("    {}: local \"{}\" at {}, server \"{}\" at {}", r.title, l.body, when(l), r.body, when(r));
        }
    }

    if !remote_only.is_empty() {
        println!("\n  ON SERVER ONLY ({}):", remote_only.len());
        for info in &remote_only {
            println!("    {}  {} ({})", when(info), info.title, info.identifier);
        }
    }

    if !local_only.is_empty() {
        println!("\n  LOCAL ONLY ({}):", local_only.len());
        for info in &local_only {
            println!("    {}  {} ({})", when(info), info.title, info.identifier);
        }
    }

    if content_mismatch.is_empty() && remote_only.is_empty() && local_only.is_empty() {
        println!("  All in sync!");
    }

    println!("\n=== Done ===");
    ExitCode::SUCCESS
}
