use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};

/// How the readiness detector picks among several candidate controls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum CandidateRanking {
    /// First ready candidate in surface order.
    #[default]
    FirstReady,
    /// Ready candidate with the largest visible area.
    LargestArea,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAgentSettings {
    pub endpoint: String,
    pub secret: String,
}

/// Static controller configuration, read once at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerSettings {
    pub enabled: bool,
    pub override_rate: f64,
    pub tick_ms: u64,
    pub verification_ms: u64,
    pub cooldown_ms: u64,
    pub notify_dedup_ms: u64,
    pub notify_duration_ms: u64,
    /// Key codes whose real keydown completes a redirected activation.
    pub redirect_keys: [String; 2],
    pub ready_labels: Vec<String>,
    pub pending_labels: Vec<String>,
    pub candidate_ranking: CandidateRanking,
    pub remote_agent: Option<RemoteAgentSettings>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            override_rate: 16.0,
            tick_ms: 150,
            verification_ms: 1500,
            cooldown_ms: 1200,
            notify_dedup_ms: 400,
            notify_duration_ms: 1200,
            redirect_keys: ["Enter".into(), "Space".into()],
            ready_labels: vec!["skip".into(), "dismiss".into(), "close".into()],
            pending_labels: vec![
                "skip in".into(),
                "ad will end".into(),
                "seconds".into(),
                "video will play after".into(),
            ],
            candidate_ranking: CandidateRanking::FirstReady,
            remote_agent: None,
        }
    }
}

impl ControllerSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn verification_window(&self) -> Duration {
        Duration::from_millis(self.verification_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn notify_dedup_window(&self) -> Duration {
        Duration::from_millis(self.notify_dedup_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.override_rate.is_finite() || self.override_rate <= 0.0 {
            bail!("override_rate must be a positive number, got {}", self.override_rate);
        }
        if self.tick_ms == 0 {
            bail!("tick_ms must be greater than zero");
        }
        if self.verification_ms == 0 {
            bail!("verification_ms must be greater than zero");
        }
        if let Some(agent) = &self.remote_agent {
            if agent.endpoint.trim().is_empty() {
                bail!("remote agent endpoint must not be empty");
            }
        }
        Ok(())
    }

    /// Applies `PODSKIP_*` overrides on top of file values.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(raw) = lookup("PODSKIP_OVERRIDE_RATE") {
            self.override_rate = raw
                .trim()
                .parse()
                .with_context(|| format!("PODSKIP_OVERRIDE_RATE is not a number: {raw}"))?;
        }

        if let Some(endpoint) = lookup("PODSKIP_AGENT_URL") {
            let secret = lookup("PODSKIP_AGENT_SECRET").unwrap_or_default();
            self.remote_agent = Some(RemoteAgentSettings { endpoint, secret });
        }

        let debug_mode = lookup("PODSKIP_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if debug_mode {
            self.tick_ms = 50;
        }

        Ok(())
    }
}

pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Reads the settings file; a missing file yields defaults. Process
    /// environment overrides are applied on top.
    pub fn load(&self) -> Result<ControllerSettings> {
        self.load_with(|key| std::env::var(key).ok())
    }

    /// Like [`SettingsStore::load`], with overrides read through `lookup`.
    pub fn load_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<ControllerSettings> {
        let mut settings = if self.path.exists() {
            let contents = fs::read_to_string(&self.path)
                .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid settings in {}", self.path.display()))?
        } else {
            ControllerSettings::default()
        };

        settings.apply_overrides(lookup)?;
        settings.validate()?;
        Ok(settings)
    }
}
