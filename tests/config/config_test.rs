//! Coverage for config parsing, overrides and path resolution.

use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveTime;

use carebook::config::{data_dir, CarebookConfig};
use carebook::notify::{MessageType, Priority};

fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn defaults_match_documented_values() {
    let config = CarebookConfig::default();
    assert_eq!(config.transport.base_url, "https://api.ultramsg.com");
    assert_eq!(config.transport.send_timeout(), Duration::from_secs(10));
    assert_eq!(config.responder.timeout_secs, 30);

    let rules = config.booking.rules().expect("default rules");
    assert_eq!(rules.open, NaiveTime::from_hms_opt(9, 0, 0).expect("time"));
    assert_eq!(rules.close, NaiveTime::from_hms_opt(18, 0, 0).expect("time"));
    assert_eq!(rules.open_days.len(), 7);
    assert_eq!(rules.max_advance_days, 30);
}

#[test]
fn default_config_is_not_servable() {
    let problems = CarebookConfig::default().problems();
    assert!(problems.iter().any(|p| p.contains("coordinator.phone")));
    assert!(problems.iter().any(|p| p.contains("transport.instance_id")));
}

#[test]
fn env_completes_a_minimal_file() {
    let mut config = CarebookConfig::from_toml("[booking]\nmax_advance_days = 7\n")
        .expect("parse");
    config.apply_overrides(env_of(&[
        ("CAREBOOK_COORDINATOR_PHONE", "+974 5500 0001"),
        ("CAREBOOK_INSTANCE_ID", "instance9"),
        ("CAREBOOK_PROVIDER_ID", "4"),
        ("CAREBOOK_RESPONDER_URL", "http://127.0.0.1:8700/reply"),
    ]));

    assert!(config.problems().is_empty(), "{:?}", config.problems());
    assert_eq!(config.coordinator.provider_id, Some(4));
    assert_eq!(config.booking.max_advance_days, 7);
    assert_eq!(
        config.responder.url.as_deref(),
        Some("http://127.0.0.1:8700/reply")
    );
}

#[test]
fn unknown_template_key_is_a_problem() {
    let config = CarebookConfig::from_toml(
        "[templates.client_fanfare]\nbody = \"hi\"\n",
    )
    .expect("parse");
    assert!(config.template_set().is_err());
    assert!(config.problems().iter().any(|p| p.starts_with("templates:")));
}

#[test]
fn template_priority_override_keeps_body() {
    let config = CarebookConfig::from_toml(
        "[templates.client_guidance]\npriority = \"high\"\n",
    )
    .expect("parse");
    let templates = config.template_set().expect("templates");
    let guidance = templates.get(MessageType::ClientGuidance);
    assert_eq!(guidance.priority, Priority::High);
    assert!(guidance.body.contains("{guidance}"));
}

#[test]
fn explicit_paths_win_over_data_dir() {
    let config = CarebookConfig::from_toml(
        "[paths]\ndatabase = \"/srv/carebook/book.db\"\nlogs = \"/var/log/carebook\"\n",
    )
    .expect("parse");
    assert_eq!(
        config.paths.database_path().expect("db path"),
        std::path::PathBuf::from("/srv/carebook/book.db")
    );
    assert_eq!(
        config.paths.logs_dir().expect("logs dir"),
        std::path::PathBuf::from("/var/log/carebook")
    );
}

#[test]
fn data_dir_resolves() {
    let dir = data_dir().expect("data dir should resolve");
    assert!(dir.ends_with(".carebook"));
}

#[test]
fn template_override_with_unknown_placeholder_is_a_problem() {
    let config = CarebookConfig::from_toml(
        "[templates.client_confirmation]\nbody = \"Hi {client_nme}, see you {appointment_date}\"\n",
    )
    .expect("parse");
    let err = config.template_set().expect_err("misspelled placeholder");
    assert!(format!("{err:#}").contains("{client_nme}"));
    assert!(config
        .problems()
        .iter()
        .any(|p| p.starts_with("templates:") && p.contains("{client_nme}")));
}

#[test]
fn template_override_using_known_placeholders_is_accepted() {
    let config = CarebookConfig::from_toml(
        "[templates.client_confirmation]\nbody = \"See you {appointment_date}, {client_name}.\"\n",
    )
    .expect("parse");
    let templates = config.template_set().expect("templates");
    assert_eq!(
        templates.get(MessageType::ClientConfirmation).body,
        "See you {appointment_date}, {client_name}."
    );
    assert!(!config.problems().iter().any(|p| p.starts_with("templates:")));
}
