//! Fleet configuration.
//!
//! Thresholds and intervals live in `.beads/queue-thresholds.conf` as plain
//! `KEY=value` lines — the format is shared with shell tooling, so TOML is
//! not used here. Environment variables overlay the file; unknown keys are
//! ignored with a debug log.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::paths::ProjectPaths;

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueThresholds {
    pub low: u64,
    pub medium: u64,
    pub high: u64,
    pub critical: u64,
}

impl Default for QueueThresholds {
    fn default() -> Self {
        Self { low: 5, medium: 10, high: 20, critical: 40 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerConfig {
    pub min_agents: usize,
    pub max_agents: usize,
    /// Scale up when `ready / (active + 1)` exceeds this.
    pub scale_up_ratio: f64,
    pub check_interval_secs: u64,
    pub idle_timeout_secs: u64,
    /// Delay between consecutive spawns in one scale-up.
    pub spawn_delay_ms: u64,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            min_agents: 0,
            max_agents: 8,
            scale_up_ratio: 2.0,
            check_interval_secs: 300,
            idle_timeout_secs: 1800,
            spawn_delay_ms: 2000,
        }
    }
}

impl ScalerConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub thresholds: QueueThresholds,
    pub check_interval_secs: u64,
    pub health_check_interval_secs: u64,
    pub stuck_task_threshold_secs: u64,
    pub hung_agent_threshold_secs: u64,
    /// Minimum interval between identical nudges to the same agent.
    pub nudge_cooldown_secs: u64,
    pub notify_coordinators: bool,
    pub coordinator_recipient: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            thresholds: QueueThresholds::default(),
            check_interval_secs: 300,
            health_check_interval_secs: 600,
            stuck_task_threshold_secs: 2 * 3600,
            hung_agent_threshold_secs: 30 * 60,
            nudge_cooldown_secs: 3600,
            notify_coordinators: true,
            coordinator_recipient: "@coordinators".into(),
        }
    }
}

impl MonitorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationConfig {
    pub default_ttl_secs: u64,
    pub warn_threshold_secs: u64,
    /// Skip the reservation service entirely (logged).
    pub bypass: bool,
    /// Auto-release this agent's own overlapping older reservations instead
    /// of failing with a self-conflict.
    pub auto_release_own_stale: bool,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 1800,
            warn_threshold_secs: 900,
            bypass: false,
            auto_release_own_stale: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    pub server_url: String,
    /// Directory holding the bearer token file, when the service requires one.
    pub token_dir: Option<String>,
    /// Override for the mail project key; defaults to the project root path.
    pub project_key: Option<String>,
    /// This process's own agent identity, when acting as one.
    pub agent_name: Option<String>,
    /// Sender name override for system notifications (e.g. `SystemNotify`).
    pub sender_override: Option<String>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8765/rpc".into(),
            token_dir: None,
            project_key: None,
            agent_name: None,
            sender_override: None,
        }
    }
}

// ---------------------------------------------------------------------------
// FleetConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub scaler: ScalerConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub reservations: ReservationConfig,
    #[serde(default)]
    pub mail: MailConfig,
}

impl FleetConfig {
    /// Load from `.beads/queue-thresholds.conf` (missing file ⇒ defaults),
    /// then overlay recognized environment variables.
    pub fn load(paths: &ProjectPaths) -> Self {
        let mut cfg = Self::default();
        let conf = paths.thresholds_conf();
        if conf.exists() {
            match std::fs::read_to_string(&conf) {
                Ok(text) => cfg.apply_conf(&text),
                Err(e) => warn!(path = %conf.display(), error = %e, "failed to read thresholds conf"),
            }
        }
        cfg.apply_env();
        cfg
    }

    pub fn load_from_str(text: &str) -> Self {
        let mut cfg = Self::default();
        cfg.apply_conf(text);
        cfg
    }

    fn apply_conf(&mut self, text: &str) {
        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                debug!(line = %line, "ignoring conf line without '='");
                continue;
            };
            self.apply_kv(key.trim(), value.trim());
        }
    }

    fn apply_env(&mut self) {
        for key in [
            "MAIL_SERVER",
            "MCP_AGENT_MAIL_DIR",
            "PROJECT_KEY",
            "AGENT_NAME",
            "BYPASS_RESERVATION",
            "AUTO_RELEASE_OWN_STALE",
            "DEFAULT_TTL",
            "TTL_WARN_THRESHOLD",
            "MAIL_SENDER_NAME",
        ] {
            if let Ok(value) = std::env::var(key) {
                if !value.is_empty() {
                    self.apply_kv(key, &value);
                }
            }
        }
    }

    fn apply_kv(&mut self, key: &str, value: &str) {
        match key {
            "QUEUE_LOW" => set_u64(&mut self.monitor.thresholds.low, key, value),
            "QUEUE_MEDIUM" => set_u64(&mut self.monitor.thresholds.medium, key, value),
            "QUEUE_HIGH" => set_u64(&mut self.monitor.thresholds.high, key, value),
            "QUEUE_CRITICAL" => set_u64(&mut self.monitor.thresholds.critical, key, value),
            "CHECK_INTERVAL" => {
                set_u64(&mut self.monitor.check_interval_secs, key, value);
                set_u64(&mut self.scaler.check_interval_secs, key, value);
            }
            "HEALTH_CHECK_INTERVAL" => {
                set_u64(&mut self.monitor.health_check_interval_secs, key, value)
            }
            "STUCK_TASK_THRESHOLD" => {
                set_u64(&mut self.monitor.stuck_task_threshold_secs, key, value)
            }
            "HUNG_AGENT_THRESHOLD" => {
                set_u64(&mut self.monitor.hung_agent_threshold_secs, key, value)
            }
            "NUDGE_COOLDOWN" => set_u64(&mut self.monitor.nudge_cooldown_secs, key, value),
            "NOTIFY_COORDINATORS" => self.monitor.notify_coordinators = parse_bool(value),
            "COORDINATOR_RECIPIENT" => self.monitor.coordinator_recipient = value.to_string(),
            "IDLE_TIMEOUT" => set_u64(&mut self.scaler.idle_timeout_secs, key, value),
            "MIN_AGENTS" => set_usize(&mut self.scaler.min_agents, key, value),
            "MAX_AGENTS" => set_usize(&mut self.scaler.max_agents, key, value),
            "SCALE_UP_THRESHOLD" => match value.parse::<f64>() {
                Ok(v) => self.scaler.scale_up_ratio = v,
                Err(_) => warn!(key, value, "ignoring unparseable conf value"),
            },
            "SPAWN_DELAY_MS" => set_u64(&mut self.scaler.spawn_delay_ms, key, value),
            "MAIL_SERVER" => self.mail.server_url = value.to_string(),
            "MCP_AGENT_MAIL_DIR" => self.mail.token_dir = Some(value.to_string()),
            "PROJECT_KEY" => self.mail.project_key = Some(value.to_string()),
            "AGENT_NAME" => self.mail.agent_name = Some(value.to_string()),
            "MAIL_SENDER_NAME" => self.mail.sender_override = Some(value.to_string()),
            "BYPASS_RESERVATION" => self.reservations.bypass = parse_bool(value),
            "AUTO_RELEASE_OWN_STALE" => self.reservations.auto_release_own_stale = parse_bool(value),
            "DEFAULT_TTL" => set_u64(&mut self.reservations.default_ttl_secs, key, value),
            "TTL_WARN_THRESHOLD" => set_u64(&mut self.reservations.warn_threshold_secs, key, value),
            other => debug!(key = other, "ignoring unknown conf key"),
        }
    }

    /// Read the bearer token for the mail service, when configured.
    pub fn mail_token(&self) -> Option<String> {
        let dir = self.mail.token_dir.as_ref()?;
        let path = Path::new(dir).join("token");
        let token = std::fs::read_to_string(path).ok()?;
        let token = token.trim().to_string();
        (!token.is_empty()).then_some(token)
    }
}

fn set_u64(slot: &mut u64, key: &str, value: &str) {
    match value.parse::<u64>() {
        Ok(v) => *slot = v,
        Err(_) => warn!(key, value, "ignoring unparseable conf value"),
    }
}

fn set_usize(slot: &mut usize, key: &str, value: &str) {
    match value.parse::<usize>() {
        Ok(v) => *slot = v,
        Err(_) => warn!(key, value, "ignoring unparseable conf value"),
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = FleetConfig::default();
        assert_eq!(cfg.monitor.thresholds.low, 5);
        assert_eq!(cfg.scaler.max_agents, 8);
        assert_eq!(cfg.reservations.default_ttl_secs, 1800);
        assert_eq!(cfg.monitor.stuck_task_threshold_secs, 7200);
    }

    #[test]
    fn conf_lines_overlay_defaults() {
        let cfg = FleetConfig::load_from_str(
            "# thresholds\nQUEUE_HIGH=25\nMAX_AGENTS=12\nSCALE_UP_THRESHOLD=1.5\nBYPASS_RESERVATION=true\n",
        );
        assert_eq!(cfg.monitor.thresholds.high, 25);
        assert_eq!(cfg.scaler.max_agents, 12);
        assert!((cfg.scaler.scale_up_ratio - 1.5).abs() < f64::EPSILON);
        assert!(cfg.reservations.bypass);
        // untouched keys keep defaults
        assert_eq!(cfg.monitor.thresholds.low, 5);
    }

    #[test]
    fn malformed_values_are_ignored() {
        let cfg = FleetConfig::load_from_str("QUEUE_LOW=banana\nnot a line\n");
        assert_eq!(cfg.monitor.thresholds.low, 5);
    }

    #[test]
    fn check_interval_sets_both_loops() {
        let cfg = FleetConfig::load_from_str("CHECK_INTERVAL=60\n");
        assert_eq!(cfg.monitor.check_interval_secs, 60);
        assert_eq!(cfg.scaler.check_interval_secs, 60);
    }

    #[test]
    fn bool_parsing() {
        assert!(parse_bool("1"));
        assert!(parse_bool("TRUE"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("nope"));
    }
}
