use assistant_runtime::event_store::{EventStore, EventStoreConfig};
use assistant_runtime::Config;
use clap::ArgMatches;
use std::path::PathBuf;
use uuid::Uuid;

pub async fn tail(matches: &ArgMatches) {
    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let config = match Config::load(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let n: usize = matches
        .get_one::<String>("n")
        .and_then(|v| v.parse().ok())
        .unwrap_or(50);
    let conv_id = matches.get_one::<String>("conv-id").and_then(|v| Uuid::parse_str(v).ok());
    let acts: Option<Vec<String>> = matches
        .get_one::<String>("acts")
        .map(|raw| raw.split(',').map(|s| s.trim().to_string()).collect());

    let store = EventStore::new(EventStoreConfig::from(&config.event_store));
    match store.tail(n, conv_id, acts.as_deref()).await {
        Ok(events) => {
            for event in events {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => eprintln!("failed to serialize event {}: {e}", event.id),
                }
            }
        }
        Err(e) => {
            eprintln!("failed to read event log: {e}");
            std::process::exit(1);
        }
    }
}
