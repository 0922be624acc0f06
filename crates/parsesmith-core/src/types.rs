//! Core type definitions for parsesmith

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{ParseSmithError, Result};

const MAX_BANK_ID_LEN: usize = 64;

/// Identifier of the institution whose statement format a parser targets
///
/// Used verbatim in file names and interpolated into generated source, so
/// only ASCII alphanumerics, `_` and `-` are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BankId(String);

impl BankId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let trimmed = id.trim();

        if trimmed.is_empty() {
            return Err(ParseSmithError::InvalidBank(
                "bank identifier must not be empty".to_string(),
            ));
        }

        if trimmed.len() > MAX_BANK_ID_LEN {
            return Err(ParseSmithError::InvalidBank(format!(
                "'{}' is longer than {} characters",
                trimmed, MAX_BANK_ID_LEN
            )));
        }

        if let Some(bad) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(ParseSmithError::InvalidBank(format!(
                "'{}' contains invalid character '{}'",
                trimmed, bad
            )));
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BankId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for BankId {
    type Err = ParseSmithError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for BankId {
    type Error = ParseSmithError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<BankId> for String {
    fn from(id: BankId) -> Self {
        id.0
    }
}

/// Where generated artifacts and reference data live
///
/// Directory fields are relative to `root` (absolute values are honoured).
/// Relative forms are what the generated test embeds, since it runs with
/// `root` as its working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    pub root: PathBuf,
    pub parser_dir: PathBuf,
    pub test_dir: PathBuf,
    pub data_dir: PathBuf,
    pub report_dir: PathBuf,
    /// Generated test parses `sample.pdf` before `result.csv`
    pub prefer_pdf: bool,
}

impl ArtifactLayout {
    pub fn parser_file_name(bank: &BankId) -> String {
        format!("{}_parser.py", bank)
    }

    pub fn test_file_name(bank: &BankId) -> String {
        format!("test_{}_parser.py", bank)
    }

    pub fn report_file_name(bank: &BankId) -> String {
        format!("test_{}_parser.json", bank)
    }

    /// Parser path relative to the root
    pub fn relative_parser_path(&self, bank: &BankId) -> PathBuf {
        self.parser_dir.join(Self::parser_file_name(bank))
    }

    /// Test path relative to the root, as handed to the test runner
    pub fn relative_test_path(&self, bank: &BankId) -> PathBuf {
        self.test_dir.join(Self::test_file_name(bank))
    }

    /// Report path relative to the root
    pub fn relative_report_path(&self, bank: &BankId) -> PathBuf {
        self.report_dir.join(Self::report_file_name(bank))
    }

    pub fn parser_dir_path(&self) -> PathBuf {
        self.root.join(&self.parser_dir)
    }

    pub fn test_dir_path(&self) -> PathBuf {
        self.root.join(&self.test_dir)
    }

    pub fn parser_path(&self, bank: &BankId) -> PathBuf {
        self.root.join(self.relative_parser_path(bank))
    }

    pub fn test_path(&self, bank: &BankId) -> PathBuf {
        self.root.join(self.relative_test_path(bank))
    }

    pub fn report_path(&self, bank: &BankId) -> PathBuf {
        self.root.join(self.relative_report_path(bank))
    }

    /// Reference data directory for one bank (`data/<bank>`)
    pub fn bank_data_dir(&self, bank: &BankId) -> PathBuf {
        self.root.join(&self.data_dir).join(bank.as_str())
    }

    pub fn reference_csv(&self, bank: &BankId) -> PathBuf {
        self.bank_data_dir(bank).join("result.csv")
    }

    pub fn sample_pdf(&self, bank: &BankId) -> PathBuf {
        self.bank_data_dir(bank).join("sample.pdf")
    }
}

impl Default for ArtifactLayout {
    fn default() -> Self {
        crate::ParseSmithConfig::default().layout(".")
    }
}

/// Mutable state threaded through one run of the retry loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub bank: BankId,
    /// Current attempt, starting at 1
    pub attempt: usize,
    pub success: bool,
    /// Columns reported as mismatched by the most recent test run
    pub mismatches: Vec<String>,
    pub parser_path: Option<PathBuf>,
    pub test_path: Option<PathBuf>,
}

impl WorkflowState {
    pub fn new(bank: BankId) -> Self {
        Self {
            bank,
            attempt: 1,
            success: false,
            mismatches: Vec::new(),
            parser_path: None,
            test_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bank_id_valid() {
        let id = BankId::new("icici").unwrap();
        assert_eq!(id.as_str(), "icici");
        assert_eq!(BankId::new("  sbi_2024-v2 ").unwrap().as_str(), "sbi_2024-v2");
        assert_eq!("hdfc".parse::<BankId>().unwrap().to_string(), "hdfc");
    }

    #[test]
    fn test_bank_id_rejects_bad_input() {
        assert!(BankId::new("").is_err());
        assert!(BankId::new("   ").is_err());
        assert!(BankId::new("../etc").is_err());
        assert!(BankId::new("icici bank").is_err());
        assert!(BankId::new("a\"b").is_err());
        assert!(BankId::new("x".repeat(65)).is_err());
    }

    #[test]
    fn test_bank_id_serde() {
        let id = BankId::new("icici").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"icici\"");
        let parsed: BankId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
        assert!(serde_json::from_str::<BankId>("\"no/slash\"").is_err());
    }

    #[test]
    fn test_layout_paths_are_deterministic() {
        let layout = crate::ParseSmithConfig::default().layout("/work");
        let bank = BankId::new("icici").unwrap();

        assert_eq!(
            layout.parser_path(&bank),
            PathBuf::from("/work/custom_parsers/icici_parser.py")
        );
        assert_eq!(
            layout.test_path(&bank),
            PathBuf::from("/work/tests/test_icici_parser.py")
        );
        assert_eq!(
            layout.report_path(&bank),
            PathBuf::from("/work/tests/.reports/test_icici_parser.json")
        );
        assert_eq!(
            layout.reference_csv(&bank),
            PathBuf::from("/work/data/icici/result.csv")
        );
        assert_eq!(
            layout.sample_pdf(&bank),
            PathBuf::from("/work/data/icici/sample.pdf")
        );
        assert_eq!(
            layout.relative_parser_path(&bank),
            PathBuf::from("custom_parsers/icici_parser.py")
        );
        assert_eq!(
            layout.relative_test_path(&bank),
            PathBuf::from("tests/test_icici_parser.py")
        );
    }

    #[test]
    fn test_workflow_state_starts_at_attempt_one() {
        let state = WorkflowState::new(BankId::new("icici").unwrap());
        assert_eq!(state.attempt, 1);
        assert!(!state.success);
        assert!(state.mismatches.is_empty());
        assert!(state.parser_path.is_none());
    }
}
