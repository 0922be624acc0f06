//! Parser code generation
//!
//! Turns a free-text model reply into parser source: the first fenced code
//! block is extracted, conversational preamble lines are dropped, and the
//! result must pass a syntax check and contain the `parse` entry point.
//! Any failure yields [`FALLBACK_PARSER`], with the cause kept in the
//! returned [`Generation`].

use crate::client::CodeModel;
use crate::prompt::{build_generation_prompt, GenerationRequest};
use parsesmith_core::SyntaxCheckConfig;
use regex::Regex;
use serde::Serialize;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Signature every generated parser must define
pub const ENTRY_POINT: &str = "def parse(";

/// Parser written when generation fails: CSV passthrough, empty otherwise
pub const FALLBACK_PARSER: &str = r#"import pandas as pd


def parse(file_path: str) -> pd.DataFrame:
    if file_path.lower().endswith(".csv"):
        return pd.read_csv(file_path)
    return pd.DataFrame()
"#;

const SYNTAX_CHECK_SCRIPT: &str = "import ast, sys; ast.parse(sys.stdin.read())";

fn code_fence() -> &'static Regex {
    static CODE_FENCE: OnceLock<Regex> = OnceLock::new();
    CODE_FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:python3?|py)?(.*?)```").expect("code fence regex is valid")
    })
}

/// Extract parser source from a model reply
///
/// Takes the first fenced block (or the whole reply if there is none),
/// drops lines starting with "Here" and trims the result.
pub fn extract_code(raw: &str) -> String {
    let code = code_fence()
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw);

    code.lines()
        .filter(|line| !line.trim_start().starts_with("Here"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Why generation fell back to [`FALLBACK_PARSER`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum GenerationFailure {
    /// Backend request failed or returned nothing usable
    Request(String),
    /// Reply did not contain a valid parser
    Validation(String),
}

impl std::fmt::Display for GenerationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request(msg) => write!(f, "request failed: {}", msg),
            Self::Validation(msg) => write!(f, "validation failed: {}", msg),
        }
    }
}

/// Outcome of one generation attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Generation {
    Generated { source: String },
    Fallback { source: String, cause: GenerationFailure },
}

impl Generation {
    pub fn fallback(cause: GenerationFailure) -> Self {
        Self::Fallback {
            source: FALLBACK_PARSER.to_string(),
            cause,
        }
    }

    pub fn source(&self) -> &str {
        match self {
            Self::Generated { source } | Self::Fallback { source, .. } => source,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }

    pub fn failure(&self) -> Option<&GenerationFailure> {
        match self {
            Self::Generated { .. } => None,
            Self::Fallback { cause, .. } => Some(cause),
        }
    }
}

/// Syntax check applied to extracted source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxCheck {
    /// Parse the source with `<interpreter> -c "import ast ..."`
    Python {
        interpreter: String,
        timeout: Duration,
    },
    /// Only the entry point check applies
    Disabled,
}

impl SyntaxCheck {
    pub fn from_config(config: &SyntaxCheckConfig) -> Self {
        if config.enabled {
            Self::Python {
                interpreter: config.interpreter.clone(),
                timeout: Duration::from_secs(config.timeout_secs),
            }
        } else {
            Self::Disabled
        }
    }

    /// Check that `source` parses, returning the interpreter's complaint if not
    pub async fn check(&self, source: &str) -> Result<(), String> {
        let (interpreter, timeout) = match self {
            Self::Disabled => return Ok(()),
            Self::Python {
                interpreter,
                timeout,
            } => (interpreter, *timeout),
        };

        let mut child = Command::new(interpreter)
            .args(["-c", SYNTAX_CHECK_SCRIPT])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to run {}: {}", interpreter, e))?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(source.as_bytes()).await {
                tracing::debug!("Syntax check stdin closed early: {}", e);
            }
        }

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                format!(
                    "{} timed out after {} seconds",
                    interpreter,
                    timeout.as_secs()
                )
            })?
            .map_err(|e| format!("failed to wait for {}: {}", interpreter, e))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last_line = stderr.lines().last().unwrap_or("syntax check failed");
            Err(last_line.trim().to_string())
        }
    }
}

/// Generates parser source for a bank using a [`CodeModel`]
pub struct CodeGenerator<M: CodeModel> {
    model: M,
    syntax: SyntaxCheck,
}

impl<M: CodeModel> CodeGenerator<M> {
    pub fn new(model: M, syntax: SyntaxCheck) -> Self {
        Self { model, syntax }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Generate parser source; never fails, falls back instead
    pub async fn generate(&self, request: &GenerationRequest<'_>) -> Generation {
        let prompt = build_generation_prompt(request);
        tracing::debug!("Prompt length: {} chars", prompt.len());

        let completion = match self.model.complete(&prompt, request.attempt).await {
            Ok(completion) => completion,
            Err(e) => {
                let cause = GenerationFailure::Request(e.to_string());
                tracing::warn!("Attempt {}: {}, using fallback parser", request.attempt, cause);
                return Generation::fallback(cause);
            }
        };

        let source = extract_code(&completion.text);
        match self.validate(&source).await {
            Ok(()) => {
                tracing::info!(
                    "Attempt {}: generated parser ({} lines)",
                    request.attempt,
                    source.lines().count()
                );
                Generation::Generated { source }
            }
            Err(cause) => {
                tracing::warn!("Attempt {}: {}, using fallback parser", request.attempt, cause);
                Generation::fallback(cause)
            }
        }
    }

    async fn validate(&self, source: &str) -> Result<(), GenerationFailure> {
        if source.is_empty() {
            return Err(GenerationFailure::Validation(
                "no code found in reply".to_string(),
            ));
        }

        self.syntax
            .check(source)
            .await
            .map_err(|e| GenerationFailure::Validation(format!("syntax error: {}", e)))?;

        if !source.contains(ENTRY_POINT) {
            return Err(GenerationFailure::Validation(
                "missing parse() entry point".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockCodeModel;
    use parsesmith_core::BankId;

    const GOOD_PARSER: &str = "import pandas as pd\n\ndef parse(file_path: str) -> pd.DataFrame:\n    return pd.read_csv(file_path)";

    fn request(bank: &BankId) -> GenerationRequest<'_> {
        GenerationRequest {
            bank,
            attempt: 1,
            max_attempts: 3,
            feedback: None,
        }
    }

    #[test]
    fn test_extract_fenced_python_block() {
        let raw = "Here is your parser:\n```python\nimport pandas as pd\ndef parse(p):\n    return 1\n```\nEnjoy!";
        assert_eq!(extract_code(raw), "import pandas as pd\ndef parse(p):\n    return 1");
    }

    #[test]
    fn test_extract_takes_first_block() {
        let raw = "```\nfirst = 1\n```\ntext\n```python\nsecond = 2\n```";
        assert_eq!(extract_code(raw), "first = 1");
    }

    #[test]
    fn test_extract_without_fence_uses_raw_reply() {
        let raw = "Here's the code\nimport pandas as pd\ndef parse(p): pass\n";
        assert_eq!(extract_code(raw), "import pandas as pd\ndef parse(p): pass");
    }

    #[test]
    fn test_extract_strips_indented_preamble() {
        let raw = "```py\n  Here you go\nx = 1\n```";
        assert_eq!(extract_code(raw), "x = 1");
    }

    #[test]
    fn test_fallback_parser_has_entry_point() {
        assert!(FALLBACK_PARSER.contains(ENTRY_POINT));
        assert!(FALLBACK_PARSER.contains("pd.read_csv"));
        assert!(FALLBACK_PARSER.contains("pd.DataFrame()"));
    }

    #[test]
    fn test_generation_accessors() {
        let generated = Generation::Generated {
            source: "x".to_string(),
        };
        assert_eq!(generated.source(), "x");
        assert!(!generated.is_fallback());
        assert!(generated.failure().is_none());

        let fallback = Generation::fallback(GenerationFailure::Request("down".to_string()));
        assert_eq!(fallback.source(), FALLBACK_PARSER);
        assert!(fallback.is_fallback());
        assert_eq!(
            fallback.failure().unwrap().to_string(),
            "request failed: down"
        );
    }

    #[test]
    fn test_syntax_check_from_config() {
        let mut config = SyntaxCheckConfig::default();
        assert!(matches!(SyntaxCheck::from_config(&config), SyntaxCheck::Python { .. }));
        config.enabled = false;
        assert_eq!(SyntaxCheck::from_config(&config), SyntaxCheck::Disabled);
    }

    #[tokio::test]
    async fn test_missing_interpreter_fails_check() {
        let check = SyntaxCheck::Python {
            interpreter: "parsesmith-no-such-interpreter".to_string(),
            timeout: Duration::from_secs(5),
        };
        let err = check.check("x = 1").await.unwrap_err();
        assert!(err.contains("parsesmith-no-such-interpreter"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hanging_interpreter_times_out() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::TempDir::new().unwrap();
        let interpreter = temp_dir.path().join("slow-python");
        std::fs::write(&interpreter, "#!/bin/sh\nsleep 10\n").unwrap();
        std::fs::set_permissions(&interpreter, std::fs::Permissions::from_mode(0o755)).unwrap();

        let check = SyntaxCheck::Python {
            interpreter: interpreter.to_string_lossy().to_string(),
            timeout: Duration::from_secs(1),
        };
        let started = std::time::Instant::now();
        let err = check.check("x = 1").await.unwrap_err();

        assert!(err.contains("timed out"), "{}", err);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_generate_success() {
        let bank = BankId::new("icici").unwrap();
        let model = MockCodeModel::new().with_reply(format!("```python\n{}\n```", GOOD_PARSER));
        let generator = CodeGenerator::new(model, SyntaxCheck::Disabled);

        let generation = generator.generate(&request(&bank)).await;
        assert_eq!(
            generation,
            Generation::Generated {
                source: GOOD_PARSER.to_string()
            }
        );
        assert!(generator.model().prompts()[0].contains("icici"));
    }

    #[tokio::test]
    async fn test_generate_request_failure_falls_back() {
        let bank = BankId::new("icici").unwrap();
        let model = MockCodeModel::new().with_failure("connection refused");
        let generator = CodeGenerator::new(model, SyntaxCheck::Disabled);

        let generation = generator.generate(&request(&bank)).await;
        assert_eq!(generation.source(), FALLBACK_PARSER);
        assert!(matches!(
            generation.failure(),
            Some(GenerationFailure::Request(msg)) if msg.contains("connection refused")
        ));
    }

    #[tokio::test]
    async fn test_generate_missing_entry_point_falls_back() {
        let bank = BankId::new("icici").unwrap();
        let model = MockCodeModel::new().with_reply("```python\ndef load(path):\n    pass\n```");
        let generator = CodeGenerator::new(model, SyntaxCheck::Disabled);

        let generation = generator.generate(&request(&bank)).await;
        assert!(generation.is_fallback());
        assert!(matches!(
            generation.failure(),
            Some(GenerationFailure::Validation(msg)) if msg.contains("entry point")
        ));
    }

    #[tokio::test]
    async fn test_generate_empty_block_falls_back() {
        let bank = BankId::new("icici").unwrap();
        let model = MockCodeModel::new().with_reply("```python\n```");
        let generator = CodeGenerator::new(model, SyntaxCheck::Disabled);

        let generation = generator.generate(&request(&bank)).await;
        assert!(matches!(
            generation.failure(),
            Some(GenerationFailure::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_generate_syntax_check_failure_falls_back() {
        let bank = BankId::new("icici").unwrap();
        let model = MockCodeModel::new().with_reply(GOOD_PARSER);
        let generator = CodeGenerator::new(
            model,
            SyntaxCheck::Python {
                interpreter: "parsesmith-no-such-interpreter".to_string(),
                timeout: Duration::from_secs(5),
            },
        );

        let generation = generator.generate(&request(&bank)).await;
        assert!(matches!(
            generation.failure(),
            Some(GenerationFailure::Validation(msg)) if msg.starts_with("syntax error")
        ));
    }
}
