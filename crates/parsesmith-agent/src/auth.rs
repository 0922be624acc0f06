//! Credential lookup for the generation backend
//!
//! The API key is only ever read from the environment. The variable name is
//! configurable (`generation.api_key_env`, default `GROQ_API_KEY`).

use parsesmith_core::{ParseSmithError, Result};
use std::env;

/// Read the API key from the named environment variable
///
/// Empty or whitespace-only values count as missing.
pub fn get_api_key(env_var: &str) -> Result<String> {
    match env::var(env_var) {
        Ok(key) if !key.trim().is_empty() => {
            tracing::debug!("Using API key from {}", env_var);
            Ok(key.trim().to_string())
        }
        _ => Err(ParseSmithError::Auth(format!(
            "No API key found. Set {}=<your key> (or change generation.api_key_env in {})",
            env_var,
            parsesmith_core::CONFIG_FILE
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to prevent concurrent env var modifications
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_env_var<F, R>(key: &str, value: Option<&str>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = ENV_LOCK.lock().unwrap();
        let original = env::var(key).ok();

        match value {
            Some(v) => env::set_var(key, v),
            None => env::remove_var(key),
        }

        let result = f();

        match original {
            Some(v) => env::set_var(key, v),
            None => env::remove_var(key),
        }

        result
    }

    #[test]
    fn test_key_present() {
        with_env_var("PARSESMITH_TEST_KEY_A", Some("gsk-test"), || {
            assert_eq!(get_api_key("PARSESMITH_TEST_KEY_A").unwrap(), "gsk-test");
        });
    }

    #[test]
    fn test_key_missing() {
        with_env_var("PARSESMITH_TEST_KEY_B", None, || {
            let err = get_api_key("PARSESMITH_TEST_KEY_B").unwrap_err();
            assert!(matches!(err, ParseSmithError::Auth(_)));
            assert!(err.to_string().contains("PARSESMITH_TEST_KEY_B"));
        });
    }

    #[test]
    fn test_blank_key_is_missing() {
        with_env_var("PARSESMITH_TEST_KEY_C", Some("   "), || {
            assert!(get_api_key("PARSESMITH_TEST_KEY_C").is_err());
        });
    }
}
