use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path};
use std::str::FromStr;

/// Environment variable that overrides `agent.tool_call_format`.
pub const TOOL_FORMAT_ENV: &str = "SUPERCODER_TOOL_FORMAT";

/// Environment variable that overrides `checkpoints.retention`.
pub const CHECKPOINT_RETENTION_ENV: &str = "SUPERCODER_CHECKPOINT_RETENTION";

const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "./supercoder.toml",
    "~/.config/supercoder/config.toml",
    "~/.supercoder.toml",
];

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub checkpoints: CheckpointConfig,
    #[serde(default)]
    pub interrupt: InterruptConfig,
}

/// Textual syntax the model uses to embed tool calls in its response.
///
/// Exactly one format is active per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallFormat {
    /// `<@TOOL>{"name": ..., "arguments": {...}}</@TOOL>`
    #[default]
    Supercoder,
    /// `to=tool:name {...}`
    QwenLike,
    /// A fenced ```json block holding `{"tool": ..., "arguments": {...}}`
    JsonBlock,
    /// `<function_call name="...">{...}</function_call>`
    XmlFunction,
    /// `<tool_call>name<arg_key>k</arg_key><arg_value>v</arg_value></tool_call>`
    GlmToolCall,
}

impl ToolCallFormat {
    pub const ALL: [ToolCallFormat; 5] = [
        ToolCallFormat::Supercoder,
        ToolCallFormat::QwenLike,
        ToolCallFormat::JsonBlock,
        ToolCallFormat::XmlFunction,
        ToolCallFormat::GlmToolCall,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCallFormat::Supercoder => "supercoder",
            ToolCallFormat::QwenLike => "qwen_like",
            ToolCallFormat::JsonBlock => "json_block",
            ToolCallFormat::XmlFunction => "xml_function",
            ToolCallFormat::GlmToolCall => "glm_tool_call",
        }
    }
}

impl fmt::Display for ToolCallFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolCallFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        ToolCallFormat::ALL
            .iter()
            .copied()
            .find(|format| format.as_str() == normalized)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown tool call format '{}'. Valid formats: {}",
                    s,
                    ToolCallFormat::ALL
                        .iter()
                        .map(|f| f.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub tool_call_format: ToolCallFormat,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            tool_call_format: ToolCallFormat::Supercoder,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Number of committed checkpoints kept before the oldest is evicted
    #[serde(default = "default_retention")]
    pub retention: usize,
    /// Checkpoint directory, relative to the project root
    #[serde(default = "default_checkpoint_directory")]
    pub directory: String,
}

fn default_retention() -> usize {
    10
}

fn default_checkpoint_directory() -> String {
    ".supercoder/checkpoints".to_string()
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            retention: default_retention(),
            directory: default_checkpoint_directory(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptConfig {
    /// Two trigger presses closer together than this abort the running turn
    #[serde(default = "default_double_press_window_ms")]
    pub double_press_window_ms: u64,
}

fn default_double_press_window_ms() -> u64 {
    500
}

impl Default for InterruptConfig {
    fn default() -> Self {
        Self {
            double_press_window_ms: default_double_press_window_ms(),
        }
    }
}

impl Config {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let config_path_to_load = match config_path {
            Some(path) => {
                if !Path::new(path).exists() {
                    anyhow::bail!("Configuration file '{}' does not exist", path);
                }
                Some(path.to_string())
            }
            None => DEFAULT_CONFIG_PATHS.iter().find_map(|path| {
                let expanded_path = shellexpand::tilde(path);
                if Path::new(expanded_path.as_ref()).exists() {
                    Some(expanded_path.to_string())
                } else {
                    None
                }
            }),
        };

        let mut config = match config_path_to_load {
            Some(path) => {
                let config_content = std::fs::read_to_string(&path)?;
                toml::from_str::<Config>(&config_content)
                    .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path, e))?
            }
            None => {
                // No config anywhere: write a default one the user can edit
                let default_config = Self::default();

                let config_dir = dirs::home_dir()
                    .map(|mut path| {
                        path.push(".config");
                        path.push("supercoder");
                        path
                    })
                    .unwrap_or_else(|| std::path::PathBuf::from("."));

                std::fs::create_dir_all(&config_dir).ok();

                let config_file = config_dir.join("config.toml");
                if let Err(e) = default_config.save(&config_file) {
                    eprintln!("Warning: Could not save default config: {}", e);
                } else {
                    println!(
                        "Created default configuration at: {}",
                        config_file.display()
                    );
                }

                default_config
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(format) = std::env::var(TOOL_FORMAT_ENV) {
            if !format.trim().is_empty() {
                self.agent.tool_call_format = format.parse()?;
            }
        }
        if let Ok(retention) = std::env::var(CHECKPOINT_RETENTION_ENV) {
            if !retention.trim().is_empty() {
                self.checkpoints.retention = retention.trim().parse().map_err(|_| {
                    anyhow::anyhow!(
                        "{} must be a positive integer, got '{}'",
                        CHECKPOINT_RETENTION_ENV,
                        retention
                    )
                })?;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.checkpoints.retention == 0 {
            anyhow::bail!("checkpoints.retention must be at least 1");
        }
        let directory = Path::new(&self.checkpoints.directory);
        let escapes_root = directory
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir));
        if self.checkpoints.directory.trim().is_empty() || escapes_root {
            anyhow::bail!(
                "checkpoints.directory must be a relative path inside the project, got '{}'",
                self.checkpoints.directory
            );
        }
        if self.interrupt.double_press_window_ms == 0 {
            anyhow::bail!("interrupt.double_press_window_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    pub fn load_with_overrides(
        config_path: Option<&str>,
        format_override: Option<ToolCallFormat>,
    ) -> Result<Self> {
        let mut config = Self::load(config_path)?;

        if let Some(format) = format_override {
            config.agent.tool_call_format = format;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests;
