//! Artifact writer for generated parsers and their tests
//!
//! Each bank has exactly one parser file and one test file; every write
//! fully replaces the previous content. The test file is rendered from a
//! fixed template, never from model output.

use parsesmith_core::{ArtifactLayout, BankId, ParseSmithError, Result};
use std::path::{Path, PathBuf};

/// Pytest module comparing parser output against `data/<bank>/result.csv`
///
/// Missing values are normalized on both frames (numeric to 0.0, text to "")
/// before comparison. A JSON report is written for the runner and the
/// `Mismatched columns: [...]` marker is printed for plain-text consumers.
const TEST_TEMPLATE: &str = r#""""Generated by parsesmith. Rewritten on every attempt; do not edit."""
import importlib.util
import json
from pathlib import Path

import pandas as pd

BANK = "__BANK__"
PARSER_PATH = Path("__PARSER_PATH__")
DATA_DIR = Path("__DATA_DIR__")
REPORT_PATH = Path("__REPORT_PATH__")
PREFER_PDF = __PREFER_PDF__


def load_parser():
    spec = importlib.util.spec_from_file_location(f"{BANK}_parser", PARSER_PATH)
    module = importlib.util.module_from_spec(spec)
    spec.loader.exec_module(module)
    return module.parse


def normalize(df):
    df = df.copy()
    for col in df.columns:
        if pd.api.types.is_numeric_dtype(df[col]):
            df[col] = df[col].fillna(0.0)
        else:
            df[col] = df[col].fillna("")
    return df.reset_index(drop=True)


def write_report(report):
    REPORT_PATH.parent.mkdir(parents=True, exist_ok=True)
    REPORT_PATH.write_text(json.dumps(report, indent=2), encoding="utf-8")


def test_parser_output_matches_reference():
    csv_path = DATA_DIR / BANK / "result.csv"
    pdf_path = DATA_DIR / BANK / "sample.pdf"
    if PREFER_PDF:
        source = pdf_path if pdf_path.exists() else csv_path
    else:
        source = csv_path if csv_path.exists() else pdf_path
    report = {
        "bank": BANK,
        "passed": False,
        "expected_rows": None,
        "actual_rows": None,
        "mismatched_columns": [],
        "diagnostics": [],
    }

    try:
        df_out = load_parser()(str(source))
    except Exception as exc:
        report["diagnostics"].append({"kind": "parser_error", "detail": repr(exc)})
        write_report(report)
        raise

    report["actual_rows"] = len(df_out)
    if df_out.empty:
        report["diagnostics"].append({"kind": "empty_output"})
        write_report(report)
        assert not df_out.empty, "parser returned no rows"

    if not csv_path.exists():
        report["passed"] = True
        write_report(report)
        return

    df_out = normalize(df_out)
    df_ref = normalize(pd.read_csv(csv_path))
    report["expected_rows"] = len(df_ref)

    if len(df_out) != len(df_ref):
        report["diagnostics"].append(
            {"kind": "row_count", "expected": len(df_ref), "actual": len(df_out)}
        )
        write_report(report)
        assert len(df_out) == len(df_ref), f"expected {len(df_ref)} rows, got {len(df_out)}"

    mismatched = []
    for col in [c for c in df_ref.columns if c in df_out.columns]:
        try:
            pd.testing.assert_series_equal(
                df_out[col], df_ref[col], check_dtype=False, check_names=False
            )
        except AssertionError as exc:
            mismatched.append(str(col))
            detail = " ".join(str(exc).split())[:300]
            report["diagnostics"].append(
                {"kind": "column_values", "column": str(col), "detail": detail}
            )

    report["mismatched_columns"] = mismatched
    report["passed"] = not mismatched
    write_report(report)

    if mismatched:
        print(f"Mismatched columns: {mismatched}")
    assert not mismatched, f"Mismatched columns: {mismatched}"
"#;

/// Quote a path for embedding inside a Python double-quoted string
fn py_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn path_str(path: &Path) -> String {
    py_escape(&path.to_string_lossy())
}

/// Render the test module for a bank
pub fn render_test(layout: &ArtifactLayout, bank: &BankId) -> String {
    TEST_TEMPLATE
        .replace("__BANK__", bank.as_str())
        .replace("__PARSER_PATH__", &path_str(&layout.relative_parser_path(bank)))
        .replace("__DATA_DIR__", &path_str(&layout.data_dir))
        .replace("__REPORT_PATH__", &path_str(&layout.relative_report_path(bank)))
        .replace("__PREFER_PDF__", if layout.prefer_pdf { "True" } else { "False" })
}

/// A written test module and where its run will leave its report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestArtifact {
    pub bank: BankId,
    /// Working directory for the test run
    pub root: PathBuf,
    pub test_path: PathBuf,
    /// `test_path` relative to `root`, passed to the runner
    pub relative_test_path: PathBuf,
    pub report_path: PathBuf,
}

impl TestArtifact {
    pub fn for_bank(layout: &ArtifactLayout, bank: &BankId) -> Self {
        Self {
            bank: bank.clone(),
            root: layout.root.clone(),
            test_path: layout.test_path(bank),
            relative_test_path: layout.relative_test_path(bank),
            report_path: layout.report_path(bank),
        }
    }
}

/// Writes parser and test artifacts under an [`ArtifactLayout`]
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    layout: ArtifactLayout,
}

impl ArtifactWriter {
    pub fn new(layout: ArtifactLayout) -> Self {
        Self { layout }
    }

    /// Write parser source to `<parser_dir>/<bank>_parser.py`
    pub async fn write_parser(&self, bank: &BankId, source: &str) -> Result<PathBuf> {
        let path = self.layout.parser_path(bank);
        write_file(&self.layout.parser_dir_path(), &path, source).await?;
        tracing::debug!("Wrote parser to {}", path.display());
        Ok(path)
    }

    /// Write the test module to `<test_dir>/test_<bank>_parser.py`
    pub async fn write_test(&self, bank: &BankId) -> Result<TestArtifact> {
        let artifact = TestArtifact::for_bank(&self.layout, bank);
        let content = render_test(&self.layout, bank);
        write_file(&self.layout.test_dir_path(), &artifact.test_path, &content).await?;
        tracing::debug!("Wrote test to {}", artifact.test_path.display());
        Ok(artifact)
    }
}

async fn write_file(dir: &Path, path: &Path, content: &str) -> Result<()> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        ParseSmithError::Artifact(format!("Failed to create {}: {}", dir.display(), e))
    })?;

    let mut content = content.to_string();
    if !content.ends_with('\n') {
        content.push('\n');
    }

    tokio::fs::write(path, content).await.map_err(|e| {
        ParseSmithError::Artifact(format!("Failed to write {}: {}", path.display(), e))
    })
}
