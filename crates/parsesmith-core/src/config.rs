//! Configuration management for parsesmith
//!
//! Settings for the generation backend, the retry loop, the on-disk artifact
//! layout, the test runner subprocess and the syntax check applied to
//! generated code. Every field has a default, so a partial file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::ArtifactLayout;
use crate::{ParseSmithError, Result};

/// Location of the config file relative to the workspace root
pub const CONFIG_FILE: &str = ".parsesmith/config.toml";

/// Total generate-write-test cycles per run
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Workspace-level parsesmith configuration
///
/// Loaded from `.parsesmith/config.toml` in the workspace root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseSmithConfig {
    /// Generation backend settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Retry loop settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Directory layout for generated artifacts and reference data
    #[serde(default)]
    pub layout: LayoutConfig,

    /// Test runner subprocess
    #[serde(default)]
    pub test_runner: TestRunnerConfig,

    /// Syntax check for generated source
    #[serde(default)]
    pub syntax_check: SyntaxCheckConfig,
}

/// Generation backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Model name sent to the backend
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable containing the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens in a completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,

    /// Feed the previous attempt's diagnostics into the next prompt
    #[serde(default = "default_true")]
    pub feedback: bool,
}

/// Retry loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum generate-write-test cycles
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

/// Artifact directory layout, relative to the workspace root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default = "default_parser_dir")]
    pub parser_dir: PathBuf,

    #[serde(default = "default_test_dir")]
    pub test_dir: PathBuf,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,

    /// Parse `sample.pdf` even when `result.csv` exists
    #[serde(default)]
    pub prefer_pdf: bool,
}

/// Test runner subprocess configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRunnerConfig {
    /// Executable to launch
    #[serde(default = "default_python")]
    pub program: String,

    /// Arguments placed before the test file path
    #[serde(default = "default_runner_args")]
    pub args: Vec<String>,

    /// Kill the runner after this many seconds
    #[serde(default = "default_runner_timeout")]
    pub timeout_secs: u64,
}

/// Syntax check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntaxCheckConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interpreter used to parse generated source
    #[serde(default = "default_python")]
    pub interpreter: String,

    /// Kill the interpreter after this many seconds
    #[serde(default = "default_syntax_timeout")]
    pub timeout_secs: u64,
}

// Default value providers
fn default_model() -> String {
    "llama-3.1-8b-instant".to_string()
}

fn default_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_api_key_env() -> String {
    "GROQ_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> usize {
    4096
}

fn default_request_timeout() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> usize {
    DEFAULT_MAX_ATTEMPTS
}

fn default_parser_dir() -> PathBuf {
    PathBuf::from("custom_parsers")
}

fn default_test_dir() -> PathBuf {
    PathBuf::from("tests")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("tests/.reports")
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_runner_args() -> Vec<String> {
    vec!["-m".to_string(), "pytest".to_string(), "-s".to_string()]
}

fn default_syntax_timeout() -> u64 {
    30
}

fn default_runner_timeout() -> u64 {
    300
}

impl ParseSmithConfig {
    /// Load configuration from `.parsesmith/config.toml` or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = root.join(CONFIG_FILE);

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            ParseSmithError::Config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Write default configuration to `.parsesmith/config.toml`
    pub fn write_default(root: &Path) -> Result<PathBuf> {
        let config_path = root.join(CONFIG_FILE);
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| ParseSmithError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    /// Effective attempt limit (never below one)
    pub fn max_attempts(&self) -> usize {
        self.retry.max_attempts.max(1)
    }

    /// Resolve the artifact layout against a workspace root
    pub fn layout(&self, root: impl Into<PathBuf>) -> ArtifactLayout {
        ArtifactLayout {
            root: root.into(),
            parser_dir: self.layout.parser_dir.clone(),
            test_dir: self.layout.test_dir.clone(),
            data_dir: self.layout.data_dir.clone(),
            report_dir: self.layout.report_dir.clone(),
            prefer_pdf: self.layout.prefer_pdf,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_request_timeout(),
            feedback: true,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            parser_dir: default_parser_dir(),
            test_dir: default_test_dir(),
            data_dir: default_data_dir(),
            report_dir: default_report_dir(),
            prefer_pdf: false,
        }
    }
}

impl Default for TestRunnerConfig {
    fn default() -> Self {
        Self {
            program: default_python(),
            args: default_runner_args(),
            timeout_secs: default_runner_timeout(),
        }
    }
}

impl Default for SyntaxCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interpreter: default_python(),
            timeout_secs: default_syntax_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ParseSmithConfig::default();
        assert_eq!(config.generation.model, "llama-3.1-8b-instant");
        assert_eq!(config.generation.api_key_env, "GROQ_API_KEY");
        assert!((config.generation.temperature - 0.2).abs() < f32::EPSILON);
        assert!(config.generation.feedback);
        assert_eq!(config.max_attempts(), 3);
        assert_eq!(config.layout.parser_dir, PathBuf::from("custom_parsers"));
        assert_eq!(config.test_runner.args, vec!["-m", "pytest", "-s"]);
        assert!(!config.layout.prefer_pdf);
        assert_eq!(config.syntax_check.timeout_secs, 30);
    }

    #[test]
    fn test_prefer_pdf_flows_into_layout() {
        let config: ParseSmithConfig = toml::from_str("[layout]\nprefer_pdf = true\n").unwrap();
        assert!(config.layout(".").prefer_pdf);
        assert!(!ParseSmithConfig::default().layout(".").prefer_pdf);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = ParseSmithConfig::load_or_default(temp_dir.path()).unwrap();
        assert_eq!(config.max_attempts(), DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join(".parsesmith");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("config.toml"),
            "[retry]\nmax_attempts = 5\n\n[generation]\nfeedback = false\n",
        )
        .unwrap();

        let config = ParseSmithConfig::load_or_default(temp_dir.path()).unwrap();
        assert_eq!(config.max_attempts(), 5);
        assert!(!config.generation.feedback);
        assert_eq!(config.generation.model, "llama-3.1-8b-instant");
        assert_eq!(config.test_runner.program, "python3");
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.toml");
        std::fs::write(&path, "[retry\nmax_attempts = ").unwrap();

        let err = ParseSmithConfig::load(&path).unwrap_err();
        assert!(matches!(err, ParseSmithError::Config(_)));
    }

    #[test]
    fn test_write_default_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let path = ParseSmithConfig::write_default(temp_dir.path()).unwrap();
        assert!(path.ends_with("config.toml"));

        let config = ParseSmithConfig::load_or_default(temp_dir.path()).unwrap();
        assert_eq!(config.generation.base_url, "https://api.groq.com/openai/v1");
    }

    #[test]
    fn test_max_attempts_never_zero() {
        let mut config = ParseSmithConfig::default();
        config.retry.max_attempts = 0;
        assert_eq!(config.max_attempts(), 1);
    }
}
