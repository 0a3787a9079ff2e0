//! Scoped sanitization of process-wide environment variables.
//!
//! Environment variables are a shared resource across concurrent requests,
//! so the child process is primarily isolated by removing sensitive names
//! from its own environment (`Command::env_remove`). The guard here covers
//! the parent side for agent CLIs that re-read the parent environment via
//! helper processes: it pops sensitive names on entry and restores them
//! exactly on drop, on every exit path.

use tracing::{debug, warn};

/// Variables that can reveal host paths or user identity.
pub(crate) const SENSITIVE_ENV_VARS: &[&str] = &["PWD", "OLDPWD", "HOME", "USER", "LOGNAME"];

/// Application namespaces whose `*DIR*` variables leak directory layout.
pub(crate) const AGENT_ENV_PREFIXES: &[&str] = &["CLAUDE_", "GEMINI_", "QWEN_"];

/// Full set of variable names to strip for a request: the fixed list, any
/// currently set agent-namespaced name containing `DIR`, and configured
/// extras.
pub(crate) fn sensitive_var_names(extra: &[String]) -> Vec<String> {
    let mut names: Vec<String> = SENSITIVE_ENV_VARS.iter().map(|s| (*s).to_string()).collect();

    for (key, _) in std::env::vars() {
        let namespaced = AGENT_ENV_PREFIXES.iter().any(|p| key.starts_with(p));
        if namespaced && key.contains("DIR") && !names.contains(&key) {
            names.push(key);
        }
    }

    for key in extra {
        if !names.contains(key) {
            names.push(key.clone());
        }
    }

    names
}

/// Saved state of one variable: its name and prior value (`None` = absent).
type SavedVar = (String, Option<String>);

/// Scoped environment mutation with guaranteed restoration.
///
/// Restoration runs in `Drop`, so it happens on normal return, early
/// `?` propagation, and panics alike. The guard does not synchronize
/// concurrent requests; it only guarantees ordered save/restore within
/// its own scope.
#[derive(Debug)]
pub(crate) struct EnvironmentGuard {
    saved: Vec<SavedVar>,
}

impl EnvironmentGuard {
    /// Pops each present name from the environment, recording originals.
    /// Absent names are skipped and restore to absent.
    pub fn remove(names: &[String]) -> Self {
        let mut saved = Vec::new();

        for name in names {
            if let Ok(value) = std::env::var(name) {
                std::env::remove_var(name);
                debug!("Temporarily removed environment variable: {name}");
                saved.push((name.clone(), Some(value)));
            }
        }

        Self { saved }
    }

    /// Overrides a variable, recording its prior value (or absence) for
    /// restoration.
    pub fn set(&mut self, name: &str, value: &str) {
        let prior = std::env::var(name).ok();
        std::env::set_var(name, value);
        self.saved.push((name.to_string(), prior));
    }
}

impl Drop for EnvironmentGuard {
    fn drop(&mut self) {
        // Restore in reverse so stacked overrides of the same name unwind
        // to the original value.
        while let Some((name, value)) = self.saved.pop() {
            match value {
                Some(v) => {
                    std::env::set_var(&name, &v);
                    debug!("Restored environment variable: {name}");
                }
                None => {
                    std::env::remove_var(&name);
                    debug!("Cleared environment variable: {name}");
                }
            }
        }
        if std::thread::panicking() {
            warn!("Environment restored during unwind");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::sync::Mutex;

    // Process environment is global; serialize tests that touch it.
    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    #[test]
    fn test_remove_and_restore_present_variable() {
        let _lock = ENV_LOCK.lock().unwrap();
        std::env::set_var("FERRY_TEST_PRESENT", "original");

        {
            let _guard =
                EnvironmentGuard::remove(&["FERRY_TEST_PRESENT".to_string()]);
            assert!(std::env::var("FERRY_TEST_PRESENT").is_err());
        }

        assert_eq!(std::env::var("FERRY_TEST_PRESENT").unwrap(), "original");
        std::env::remove_var("FERRY_TEST_PRESENT");
    }

    #[test]
    fn test_absent_variable_stays_absent() {
        let _lock = ENV_LOCK.lock().unwrap();
        std::env::remove_var("FERRY_TEST_ABSENT");

        {
            let _guard = EnvironmentGuard::remove(&["FERRY_TEST_ABSENT".to_string()]);
        }

        assert!(std::env::var("FERRY_TEST_ABSENT").is_err());
    }

    #[test]
    fn test_set_restores_prior_value() {
        let _lock = ENV_LOCK.lock().unwrap();
        std::env::set_var("FERRY_TEST_SET", "before");

        {
            let mut guard = EnvironmentGuard::remove(&[]);
            guard.set("FERRY_TEST_SET", "during");
            assert_eq!(std::env::var("FERRY_TEST_SET").unwrap(), "during");
        }

        assert_eq!(std::env::var("FERRY_TEST_SET").unwrap(), "before");
        std::env::remove_var("FERRY_TEST_SET");
    }

    #[test]
    fn test_set_of_absent_variable_clears_on_drop() {
        let _lock = ENV_LOCK.lock().unwrap();
        std::env::remove_var("FERRY_TEST_NEW");

        {
            let mut guard = EnvironmentGuard::remove(&[]);
            guard.set("FERRY_TEST_NEW", "temp");
            assert_eq!(std::env::var("FERRY_TEST_NEW").unwrap(), "temp");
        }

        assert!(std::env::var("FERRY_TEST_NEW").is_err());
    }

    #[test]
    fn test_restore_survives_panic() {
        let _lock = ENV_LOCK.lock().unwrap();
        std::env::set_var("FERRY_TEST_PANIC", "original");

        let result = std::panic::catch_unwind(|| {
            let _guard = EnvironmentGuard::remove(&["FERRY_TEST_PANIC".to_string()]);
            panic!("boom");
        });
        assert!(result.is_err());

        assert_eq!(std::env::var("FERRY_TEST_PANIC").unwrap(), "original");
        std::env::remove_var("FERRY_TEST_PANIC");
    }

    #[test]
    fn test_sensitive_var_names_includes_fixed_set() {
        let _lock = ENV_LOCK.lock().unwrap();
        let names = sensitive_var_names(&[]);
        for fixed in SENSITIVE_ENV_VARS {
            assert!(names.contains(&(*fixed).to_string()));
        }
    }

    #[test]
    fn test_sensitive_var_names_picks_up_namespaced_dir_vars() {
        let _lock = ENV_LOCK.lock().unwrap();
        std::env::set_var("CLAUDE_CONFIG_DIR", "/somewhere");
        std::env::set_var("CLAUDE_MODEL", "opus");

        let names = sensitive_var_names(&[]);
        assert!(names.contains(&"CLAUDE_CONFIG_DIR".to_string()));
        assert!(!names.contains(&"CLAUDE_MODEL".to_string()));

        std::env::remove_var("CLAUDE_CONFIG_DIR");
        std::env::remove_var("CLAUDE_MODEL");
    }

    #[test]
    fn test_sensitive_var_names_deduplicates_extras() {
        let _lock = ENV_LOCK.lock().unwrap();
        let names = sensitive_var_names(&["HOME".to_string(), "MY_SECRET".to_string()]);
        assert_eq!(names.iter().filter(|n| n.as_str() == "HOME").count(), 1);
        assert!(names.contains(&"MY_SECRET".to_string()));
    }
}
