use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};
use crate::perception::omniparser::BoxUnits;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub services: ServicesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    pub active_provider: String,
    pub providers: HashMap<String, ProviderEntry>,
    /// Role-to-model mapping. If a role is absent, falls back to active_provider defaults.
    #[serde(default)]
    pub roles: RolesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    /// Full chat-completions endpoint, e.g. `https://api.groq.com/openai/v1/chat/completions`.
    pub api_base: String,
    /// Default model for this provider (used as fallback when no role config exists).
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Use SSE streaming for this provider's default calls.
    #[serde(default)]
    pub stream: bool,
    /// Optional API key stored in config.toml (falls back to env var DESKPILOT_<ID>_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolesConfig {
    /// Tool-calling model that drives the agent loop.
    pub reasoning: Option<RoleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleEntry {
    /// Must match a key under [llm.providers.*].
    pub provider: String,
    /// Model name sent to the API.
    pub model: String,
    #[serde(default)]
    pub stream: bool,
    /// Overrides the provider-level temperature for this role.
    pub temperature: Option<f64>,
}

fn default_temperature() -> f64 {
    0.1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_backend_failures")]
    pub max_consecutive_backend_failures: u32,
    #[serde(default = "default_reasoning_timeout")]
    pub reasoning_timeout_secs: u64,
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
    /// Forward captured screenshots to the model as image parts.
    #[serde(default)]
    pub attach_screenshots: bool,
    /// Replaces the built-in system prompt when set.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Append every transcript entry to a JSONL session file.
    #[serde(default)]
    pub persist_history: bool,
}

fn default_max_iterations() -> u32 {
    15
}

fn default_max_backend_failures() -> u32 {
    3
}

fn default_reasoning_timeout() -> u64 {
    60
}

fn default_tool_timeout() -> u64 {
    45
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_consecutive_backend_failures: default_max_backend_failures(),
            reasoning_timeout_secs: default_reasoning_timeout(),
            tool_timeout_secs: default_tool_timeout(),
            attach_screenshots: false,
            system_prompt: None,
            persist_history: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    /// Base URL of a remote OmniParser service exposing `POST /analyze`.
    #[serde(default)]
    pub omniparser_url: Option<String>,
    /// How OmniParser boxes are read: `auto`, `ratios` or `pixels`.
    #[serde(default)]
    pub omniparser_box_units: BoxUnits,
    /// Path to a YOLOv8 ONNX model (used when built with the `onnx` feature).
    #[serde(default)]
    pub yolo_model_path: Option<String>,
    #[serde(default = "default_conf_threshold")]
    pub yolo_conf_threshold: f32,
    #[serde(default = "default_iou_threshold")]
    pub yolo_iou_threshold: f32,
    #[serde(default = "default_capture_timeout")]
    pub capture_timeout_secs: u64,
    #[serde(default = "default_detect_timeout")]
    pub detect_timeout_secs: u64,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_conf_threshold() -> f32 {
    0.25
}

fn default_iou_threshold() -> f32 {
    0.45
}

fn default_capture_timeout() -> u64 {
    10
}

fn default_detect_timeout() -> u64 {
    30
}

fn default_jpeg_quality() -> u8 {
    80
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            omniparser_url: None,
            omniparser_box_units: BoxUnits::Auto,
            yolo_model_path: None,
            yolo_conf_threshold: default_conf_threshold(),
            yolo_iou_threshold: default_iou_threshold(),
            capture_timeout_secs: default_capture_timeout(),
            detect_timeout_secs: default_detect_timeout(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Pause between pointer movement and button press.
    #[serde(default = "default_pointer_settle")]
    pub pointer_settle_ms: u64,
    #[serde(default = "default_max_text_len")]
    pub max_text_len: usize,
}

fn default_pointer_settle() -> u64 {
    50
}

fn default_max_text_len() -> usize {
    2000
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            pointer_settle_ms: default_pointer_settle(),
            max_text_len: default_max_text_len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceMode {
    /// Vision and control services run inside the agent process.
    #[default]
    InProcess,
    /// Services are child processes speaking JSON-RPC over stdio.
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServicesConfig {
    #[serde(default)]
    pub mode: ServiceMode,
    /// argv of the vision service, e.g. `["deskpilot", "serve", "vision"]`.
    #[serde(default)]
    pub vision_command: Vec<String>,
    #[serde(default)]
    pub control_command: Vec<String>,
}

fn resolve_config_path() -> PilotResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(PilotError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

/// Load configuration from an explicit path, or search the default locations.
pub fn load_config(explicit: Option<&Path>) -> PilotResult<AppConfig> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => resolve_config_path()?,
    };
    let config = load_from(&path)?;
    tracing::info!(path = %path.display(), provider = %config.llm.active_provider, "config loaded");
    Ok(config)
}

pub fn load_from(path: &Path) -> PilotResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

pub fn save_config(config: &AppConfig, path: &Path) -> PilotResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

impl AppConfig {
    fn validate(&self) -> PilotResult<()> {
        if self.agent.max_iterations == 0 {
            return Err(PilotError::Config("agent.max_iterations must be at least 1".into()));
        }
        if self.agent.max_consecutive_backend_failures == 0 {
            return Err(PilotError::Config(
                "agent.max_consecutive_backend_failures must be at least 1".into(),
            ));
        }
        if self.services.mode == ServiceMode::Remote
            && (self.services.vision_command.is_empty() || self.services.control_command.is_empty())
        {
            return Err(PilotError::Config(
                "services.mode = \"remote\" requires vision_command and control_command".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[llm]
active_provider = "groq"

[llm.providers.groq]
display_name = "Groq"
api_base = "https://api.groq.com/openai/v1/chat/completions"
model = "llama-3.3-70b-versatile"
"#;

    #[test]
    fn minimal_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, MINIMAL).unwrap();

        let cfg = load_from(&path).unwrap();
        assert_eq!(cfg.agent.max_iterations, 15);
        assert_eq!(cfg.agent.max_consecutive_backend_failures, 3);
        assert_eq!(cfg.services.mode, ServiceMode::InProcess);
        assert_eq!(cfg.llm.providers["groq"].temperature, 0.1);
        assert!(cfg.vision.omniparser_url.is_none());
    }

    #[test]
    fn remote_mode_requires_commands() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, format!("{MINIMAL}\n[services]\nmode = \"remote\"\n")).unwrap();

        let err = load_from(&path).unwrap_err();
        assert!(err.to_string().contains("vision_command"));
    }

    #[test]
    fn save_then_load_keeps_agent_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        let mut cfg = load_from(&path).unwrap();
        cfg.agent.max_iterations = 4;
        cfg.agent.attach_screenshots = true;

        save_config(&cfg, &path).unwrap();
        let reloaded = load_from(&path).unwrap();
        assert_eq!(reloaded.agent.max_iterations, 4);
        assert!(reloaded.agent.attach_screenshots);
    }
}
