//! Prompt builder for parser generation

use parsesmith_core::BankId;

/// Inputs for one generation request
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub bank: &'a BankId,
    /// Current attempt, starting at 1
    pub attempt: usize,
    pub max_attempts: usize,
    /// Diagnostics from the previous failed attempt, already formatted
    pub feedback: Option<&'a str>,
}

/// Build the instruction sent to the model
///
/// The base instruction is identical for every attempt. When feedback from
/// a failed attempt is supplied, it is appended so the model can correct
/// the specific columns that failed.
pub fn build_generation_prompt(request: &GenerationRequest<'_>) -> String {
    let mut prompt = format!(
        "Generate parse(file_path: str) -> pd.DataFrame for {} PDF/CSV using pandas & pdfplumber.\n\
         Replace NaN with 0 or \"\" and return valid Python code only.\n",
        request.bank
    );

    if let Some(feedback) = request.feedback.map(str::trim).filter(|f| !f.is_empty()) {
        prompt.push_str(&format!(
            "\n## Previous attempt failed (attempt {} of {})\n\n",
            request.attempt, request.max_attempts
        ));
        prompt.push_str(feedback);
        prompt.push_str(
            "\n\nReturn a corrected version of the whole module. \
             Keep the signature parse(file_path: str) -> pd.DataFrame.\n",
        );
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank() -> BankId {
        BankId::new("icici").unwrap()
    }

    #[test]
    fn test_base_prompt_names_bank_and_contract() {
        let bank = bank();
        let prompt = build_generation_prompt(&GenerationRequest {
            bank: &bank,
            attempt: 1,
            max_attempts: 3,
            feedback: None,
        });
        assert!(prompt.contains("for icici PDF/CSV"));
        assert!(prompt.contains("parse(file_path: str) -> pd.DataFrame"));
        assert!(prompt.contains("Replace NaN with 0"));
        assert!(!prompt.contains("Previous attempt"));
    }

    #[test]
    fn test_base_prompt_is_stable_across_attempts() {
        let bank = bank();
        let first = build_generation_prompt(&GenerationRequest {
            bank: &bank,
            attempt: 1,
            max_attempts: 3,
            feedback: None,
        });
        let second = build_generation_prompt(&GenerationRequest {
            bank: &bank,
            attempt: 2,
            max_attempts: 3,
            feedback: None,
        });
        assert_eq!(first, second);
    }

    #[test]
    fn test_feedback_is_appended() {
        let bank = bank();
        let prompt = build_generation_prompt(&GenerationRequest {
            bank: &bank,
            attempt: 2,
            max_attempts: 3,
            feedback: Some("Mismatched columns: Debit Amt"),
        });
        assert!(prompt.contains("Previous attempt failed (attempt 2 of 3)"));
        assert!(prompt.contains("Debit Amt"));
    }

    #[test]
    fn test_blank_feedback_ignored() {
        let bank = bank();
        let prompt = build_generation_prompt(&GenerationRequest {
            bank: &bank,
            attempt: 2,
            max_attempts: 3,
            feedback: Some("  \n"),
        });
        assert!(!prompt.contains("Previous attempt"));
    }
}
