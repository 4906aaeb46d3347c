//! Configuration loading and validation.
//!
//! Loads `./config.toml` (or `$CAREBOOK_CONFIG_PATH`). Environment variables
//! override file values; file values override defaults. A missing file is
//! not an error.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveTime, Weekday};
use serde::Deserialize;

use crate::booking::rules::BookingRules;
use crate::notify::templates::{Template, TemplateSet};
use crate::notify::{MessageType, Priority};

// ── Top-level config ────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CarebookConfig {
    /// The coordinator who approves bookings.
    pub coordinator: CoordinatorConfig,
    /// Business hours and advance window.
    pub booking: BookingConfig,
    /// WhatsApp bridge connection.
    pub transport: TransportConfig,
    /// Notification queue and history sizing.
    pub dispatch: DispatchConfig,
    /// Conversation responder.
    pub responder: ResponderConfig,
    /// Filesystem paths for persistent state.
    pub paths: PathsConfig,
    /// Per-message-type template overrides, keyed by message type tag.
    pub templates: BTreeMap<String, TemplateOverride>,
}

impl CarebookConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_from_file() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("invalid config at {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config file {}: {e}",
                path.display()
            )),
        }
    }

    /// Config file path: `$CAREBOOK_CONFIG_PATH` or `./config.toml`.
    pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("CAREBOOK_CONFIG_PATH").map_or_else(|| PathBuf::from("config.toml"), PathBuf::from)
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests need not touch the process
    /// environment.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        // Coordinator.
        if let Some(v) = env("CAREBOOK_COORDINATOR_PHONE") {
            self.coordinator.phone = v;
        }
        if let Some(v) = env("CAREBOOK_COORDINATOR_NAME") {
            self.coordinator.name = v;
        }
        if let Some(v) = env("CAREBOOK_PROVIDER_ID") {
            match v.parse() {
                Ok(n) => self.coordinator.provider_id = Some(n),
                Err(_) => tracing::warn!(
                    var = "CAREBOOK_PROVIDER_ID",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }

        // Booking.
        if let Some(v) = env("CAREBOOK_MAX_ADVANCE_DAYS") {
            match v.parse() {
                Ok(n) => self.booking.max_advance_days = n,
                Err(_) => tracing::warn!(
                    var = "CAREBOOK_MAX_ADVANCE_DAYS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }

        // Transport.
        if let Some(v) = env("CAREBOOK_BRIDGE_URL") {
            self.transport.base_url = v;
        }
        if let Some(v) = env("CAREBOOK_INSTANCE_ID") {
            self.transport.instance_id = v;
        }

        // Responder.
        if let Some(v) = env("CAREBOOK_RESPONDER_URL") {
            self.responder.url = Some(v);
        }

        // Paths.
        if let Some(v) = env("CAREBOOK_DATABASE") {
            self.paths.database = Some(v);
        }
        if let Some(v) = env("CAREBOOK_LOGS_DIR") {
            self.paths.logs = Some(v);
        }
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or has wrongly typed values.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Every unusable value, in a human-readable form. Empty means valid.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if crate::phone::normalize(&self.coordinator.phone).is_empty() {
            problems.push("coordinator.phone is not set".to_owned());
        }
        if let Err(e) = self.booking.rules() {
            problems.push(format!("booking: {e:#}"));
        }
        if self.transport.instance_id.trim().is_empty() {
            problems.push("transport.instance_id is not set".to_owned());
        }
        if url::Url::parse(&self.transport.base_url).is_err() {
            problems.push(format!(
                "transport.base_url is not a valid URL: {}",
                self.transport.base_url
            ));
        }
        if self.transport.send_timeout_secs == 0 {
            problems.push("transport.send_timeout_secs must be positive".to_owned());
        }
        if self.dispatch.queue_capacity == 0 {
            problems.push("dispatch.queue_capacity must be positive".to_owned());
        }
        if self.dispatch.history_capacity == 0 || self.dispatch.stats_window == 0 {
            problems.push("dispatch.history_capacity and stats_window must be positive".to_owned());
        }
        if let Err(e) = self.template_set() {
            problems.push(format!("templates: {e:#}"));
        }
        problems
    }

    /// Fail with every problem listed if the config cannot be served.
    ///
    /// # Errors
    ///
    /// Returns an error joining all [`CarebookConfig::problems`].
    pub fn validate(&self) -> Result<()> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "invalid configuration:\n  - {}",
                problems.join("\n  - ")
            ))
        }
    }

    /// Built-in templates with the configured overrides applied.
    ///
    /// An override body may only use placeholders its built-in template
    /// already uses, since callers supply exactly that data.
    ///
    /// # Errors
    ///
    /// Returns an error for an override keyed by an unknown message type or
    /// whose body names a placeholder the message never supplies.
    pub fn template_set(&self) -> Result<TemplateSet> {
        let mut set = TemplateSet::builtin();
        for (key, o) in &self.templates {
            let message_type = MessageType::parse(key)
                .with_context(|| format!("unknown template key [templates.{key}]"))?;
            if let Some(body) = &o.body {
                let known = set.get(message_type).placeholders();
                let candidate = Template {
                    body: body.clone(),
                    priority: set.priority(message_type),
                };
                let unknown: Vec<String> = candidate
                    .placeholders()
                    .into_iter()
                    .filter(|name| !known.contains(name))
                    .map(|name| format!("{{{name}}}"))
                    .collect();
                if !unknown.is_empty() {
                    anyhow::bail!(
                        "[templates.{key}] uses unknown placeholder(s) {}",
                        unknown.join(", ")
                    );
                }
            }
            set.override_template(message_type, o.body.clone(), o.priority);
        }
        Ok(set)
    }
}

// ── Coordinator ─────────────────────────────────────────────────

/// The coordinator who approves bookings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Coordinator's phone in any format.
    pub phone: String,
    /// Display name stored for the coordinator.
    pub name: String,
    /// Restrict the pending queue to one provider; `None` means all.
    pub provider_id: Option<i64>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            phone: String::new(),
            name: "Coordinator".to_owned(),
            provider_id: None,
        }
    }
}

// ── Booking ─────────────────────────────────────────────────────

/// Business hours and advance window.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BookingConfig {
    /// Opening time, `HH:MM`.
    pub open: String,
    /// Closing time, `HH:MM`.
    pub close: String,
    /// Open weekdays (`mon`, `tuesday`, ...).
    pub open_days: Vec<String>,
    /// Furthest bookable day ahead.
    pub max_advance_days: u32,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            open: "09:00".to_owned(),
            close: "18:00".to_owned(),
            open_days: ["mon", "tue", "wed", "thu", "fri", "sat", "sun"]
                .iter()
                .map(|d| (*d).to_owned())
                .collect(),
            max_advance_days: 30,
        }
    }
}

impl BookingConfig {
    /// Convert to [`BookingRules`].
    ///
    /// # Errors
    ///
    /// Returns an error for malformed times or weekdays, a close time not
    /// after the open time, or no open days.
    pub fn rules(&self) -> Result<BookingRules> {
        let open = parse_time(&self.open).context("invalid booking.open")?;
        let close = parse_time(&self.close).context("invalid booking.close")?;
        if close <= open {
            anyhow::bail!("booking.close ({}) must be after booking.open ({})", self.close, self.open);
        }
        let open_days = self
            .open_days
            .iter()
            .map(|d| {
                d.trim()
                    .parse::<Weekday>()
                    .map_err(|_| anyhow::anyhow!("invalid weekday in booking.open_days: {d}"))
            })
            .collect::<Result<Vec<_>>>()?;
        if open_days.is_empty() {
            anyhow::bail!("booking.open_days is empty");
        }
        Ok(BookingRules {
            open,
            close,
            open_days,
            max_advance_days: self.max_advance_days,
        })
    }
}

fn parse_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .with_context(|| format!("expected HH:MM, got {s:?}"))
}

// ── Transport ───────────────────────────────────────────────────

/// WhatsApp bridge connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Bridge base URL.
    pub base_url: String,
    /// Bridge instance id.
    pub instance_id: String,
    /// Environment variable holding the bridge token.
    pub token_env: String,
    /// Bound on one send call, in seconds.
    pub send_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.ultramsg.com".to_owned(),
            instance_id: String::new(),
            token_env: "CAREBOOK_BRIDGE_TOKEN".to_owned(),
            send_timeout_secs: 10,
        }
    }
}

impl TransportConfig {
    /// Send timeout as a [`Duration`].
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    /// Resolve the bridge token from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable named by `token_env` is unset or empty.
    pub fn token(&self) -> Result<String> {
        std::env::var(&self.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .with_context(|| format!("bridge token not set (expected ${})", self.token_env))
    }
}

// ── Dispatch ────────────────────────────────────────────────────

/// Notification queue and history sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Queued notifications per priority lane.
    pub queue_capacity: usize,
    /// Delivery results kept in memory.
    pub history_capacity: usize,
    /// Records in the rolling success rate.
    pub stats_window: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: crate::notify::queue::DEFAULT_QUEUE_CAPACITY,
            history_capacity: crate::notify::history::DEFAULT_CAPACITY,
            stats_window: crate::notify::history::DEFAULT_STATS_WINDOW,
        }
    }
}

// ── Responder ───────────────────────────────────────────────────

/// Conversation responder.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    /// Agent endpoint. Without one every message gets `fallback_reply`.
    pub url: Option<String>,
    /// Bound on one agent call, in seconds.
    pub timeout_secs: u64,
    /// Reply used when no agent is configured.
    pub fallback_reply: String,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 30,
            fallback_reply: "Thank you for your message! Our booking assistant is offline \
                             right now. A coordinator will get back to you shortly."
                .to_owned(),
        }
    }
}

// ── Paths ───────────────────────────────────────────────────────

/// Filesystem paths for persistent state.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// SQLite database file. Defaults to `~/.carebook/carebook.db`.
    pub database: Option<String>,
    /// Log directory. Defaults to `~/.carebook/logs`.
    pub logs: Option<String>,
}

impl PathsConfig {
    /// Resolved database path.
    ///
    /// # Errors
    ///
    /// Returns an error if no path is configured and the home directory
    /// cannot be determined.
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database {
            Some(p) => Ok(PathBuf::from(p)),
            None => Ok(data_dir()?.join("carebook.db")),
        }
    }

    /// Resolved log directory.
    ///
    /// # Errors
    ///
    /// Returns an error if no path is configured and the home directory
    /// cannot be determined.
    pub fn logs_dir(&self) -> Result<PathBuf> {
        match &self.logs {
            Some(p) => Ok(PathBuf::from(p)),
            None => Ok(data_dir()?.join("logs")),
        }
    }
}

/// Resolve the default data directory (`~/.carebook/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn data_dir() -> Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".carebook"))
}

// ── Templates ───────────────────────────────────────────────────

/// Override for one template.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TemplateOverride {
    /// Replacement body.
    pub body: Option<String>,
    /// Replacement priority.
    pub priority: Option<Priority>,
}

// ── Tests ───────────────────────────────────────────────────────
