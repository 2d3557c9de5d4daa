//! Environment construction and log masking for wrapped-tool subprocesses.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

/// Variables that switch the wrapped tool into IDE-integration mode.
const DEFAULT_DENYLIST: &[&str] = &[
    "TERM_PROGRAM",
    "TERM_PROGRAM_VERSION",
    "VSCODE_PID",
    "VSCODE_IPC_HOOK_CLI",
    "VSCODE_GIT_IPC_HANDLE",
    "GEMINI_CLI_IDE_SERVER_PORT",
    "GEMINI_CLI_IDE_WORKSPACE_PATH",
];

const DEFAULT_SENSITIVE: &[&str] = &[
    "GEMINI_API_KEY",
    "GOOGLE_API_KEY",
    "GOOGLE_APPLICATION_CREDENTIALS",
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "GITHUB_TOKEN",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
];

pub const MASK_PLACEHOLDER: &str = "***";

/// Builds the explicit environment handed to each subprocess.
#[derive(Debug, Clone)]
pub struct EnvironmentSanitizer {
    denylist: Vec<String>,
    sensitive: Vec<String>,
}

impl Default for EnvironmentSanitizer {
    fn default() -> Self {
        Self::new(&[], &[])
    }
}

impl EnvironmentSanitizer {
    /// Extends the built-in denylist and sensitive-key set with caller-supplied keys.
    #[must_use]
    pub fn new(extra_denylist: &[String], extra_sensitive: &[String]) -> Self {
        let mut denylist: Vec<String> = DEFAULT_DENYLIST.iter().map(|s| (*s).to_owned()).collect();
        denylist.extend(extra_denylist.iter().cloned());
        denylist.sort();
        denylist.dedup();

        let mut sensitive: Vec<String> =
            DEFAULT_SENSITIVE.iter().map(|s| (*s).to_owned()).collect();
        sensitive.extend(extra_sensitive.iter().cloned());
        sensitive.sort();
        sensitive.dedup();

        Self {
            denylist,
            sensitive,
        }
    }

    /// Ambient environment minus the denylist, with `overrides` applied on top.
    ///
    /// Keys and values are kept as `OsString`, so non-UTF-8 entries pass through.
    #[must_use]
    pub fn build_environment<S: std::hash::BuildHasher>(
        &self,
        overrides: &HashMap<String, Option<String>, S>,
    ) -> HashMap<OsString, OsString> {
        self.build_environment_from(std::env::vars_os(), overrides)
    }

    #[must_use]
    pub fn build_environment_from<I, K, V, S>(
        &self,
        base: I,
        overrides: &HashMap<String, Option<String>, S>,
    ) -> HashMap<OsString, OsString>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
        S: std::hash::BuildHasher,
    {
        let mut env: HashMap<OsString, OsString> = base
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| !k.to_str().is_some_and(|k| self.is_denied(k)))
            .collect();

        for (key, value) in overrides {
            match value {
                Some(v) => {
                    env.insert(key.into(), v.into());
                }
                None => {
                    env.remove(OsStr::new(key));
                }
            }
        }
        env
    }

    /// Copy of `env` with sensitive values replaced by [`MASK_PLACEHOLDER`].
    #[must_use]
    pub fn mask_for_logging<S: std::hash::BuildHasher>(
        &self,
        env: &HashMap<String, String, S>,
    ) -> HashMap<String, String> {
        env.iter()
            .map(|(k, v)| {
                let value = if self.is_sensitive(k) {
                    MASK_PLACEHOLDER.to_owned()
                } else {
                    v.clone()
                };
                (k.clone(), value)
            })
            .collect()
    }

    #[must_use]
    pub fn is_denied(&self, key: &str) -> bool {
        self.denylist.iter().any(|d| d == key)
    }

    #[must_use]
    pub fn is_sensitive(&self, key: &str) -> bool {
        self.sensitive.iter().any(|s| s == key)
    }
}

/// `requested`, else `fallback`, else the current directory. Never fails.
#[must_use]
pub fn resolve_working_directory(requested: Option<&Path>, fallback: Option<&Path>) -> PathBuf {
    if let Some(dir) = requested.filter(|d| !d.as_os_str().is_empty()) {
        return dir.to_path_buf();
    }
    if let Some(dir) = fallback.filter(|d| !d.as_os_str().is_empty()) {
        return dir.to_path_buf();
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get<'a>(env: &'a HashMap<OsString, OsString>, key: &str) -> Option<&'a str> {
        env.get(OsStr::new(key)).and_then(|v| v.to_str())
    }

    fn has(env: &HashMap<OsString, OsString>, key: &str) -> bool {
        env.contains_key(OsStr::new(key))
    }

    fn base() -> Vec<(String, String)> {
        vec![
            ("PATH".into(), "/usr/bin".into()),
            ("HOME".into(), "/home/u".into()),
            ("TERM_PROGRAM".into(), "vscode".into()),
            ("VSCODE_PID".into(), "4242".into()),
            ("GEMINI_API_KEY".into(), "secret".into()),
        ]
    }

    #[test]
    fn denylisted_keys_are_removed() {
        let sanitizer = EnvironmentSanitizer::default();
        let env = sanitizer.build_environment_from(base(), &HashMap::new());
        assert!(!has(&env, "TERM_PROGRAM"));
        assert!(!has(&env, "VSCODE_PID"));
        assert_eq!(get(&env, "PATH"), Some("/usr/bin"));
        assert_eq!(get(&env, "GEMINI_API_KEY"), Some("secret"));
    }

    #[test]
    fn overrides_set_replace_and_delete() {
        let sanitizer = EnvironmentSanitizer::default();
        let mut overrides = HashMap::new();
        overrides.insert("HOME".to_owned(), Some("/tmp/home".to_owned()));
        overrides.insert("NEW_VAR".to_owned(), Some("1".to_owned()));
        overrides.insert("PATH".to_owned(), None);
        overrides.insert("NOT_PRESENT".to_owned(), None);

        let env = sanitizer.build_environment_from(base(), &overrides);
        assert_eq!(get(&env, "HOME"), Some("/tmp/home"));
        assert_eq!(get(&env, "NEW_VAR"), Some("1"));
        assert!(!has(&env, "PATH"));
        assert!(!has(&env, "NOT_PRESENT"));
    }

    #[test]
    fn override_can_reintroduce_denied_key() {
        let sanitizer = EnvironmentSanitizer::default();
        let mut overrides = HashMap::new();
        overrides.insert("TERM_PROGRAM".to_owned(), Some("custom".to_owned()));
        let env = sanitizer.build_environment_from(base(), &overrides);
        assert_eq!(get(&env, "TERM_PROGRAM"), Some("custom"));
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_entries_pass_through() {
        use std::os::unix::ffi::OsStringExt;

        let sanitizer = EnvironmentSanitizer::default();
        let key = OsString::from_vec(b"RAW_\xff".to_vec());
        let value = OsString::from_vec(b"caf\xe9".to_vec());
        let base = vec![
            (OsString::from("PLAIN"), value.clone()),
            (key.clone(), OsString::from("x")),
            (OsString::from("TERM_PROGRAM"), value.clone()),
        ];

        let env = sanitizer.build_environment_from(base, &HashMap::new());
        assert_eq!(env.get(OsStr::new("PLAIN")), Some(&value));
        assert_eq!(env.get(&key), Some(&OsString::from("x")));
        assert!(!has(&env, "TERM_PROGRAM"));
    }

    #[test]
    fn extra_denylist_is_additive() {
        let sanitizer = EnvironmentSanitizer::new(&["HOME".to_owned()], &[]);
        let env = sanitizer.build_environment_from(base(), &HashMap::new());
        assert!(!has(&env, "HOME"));
        assert!(!has(&env, "TERM_PROGRAM"));
    }

    #[test]
    fn mask_replaces_only_sensitive_values() {
        let sanitizer = EnvironmentSanitizer::new(&[], &["HOME".to_owned()]);
        let env: HashMap<String, String> = base().into_iter().collect();
        let masked = sanitizer.mask_for_logging(&env);
        assert_eq!(masked["GEMINI_API_KEY"], MASK_PLACEHOLDER);
        assert_eq!(masked["HOME"], MASK_PLACEHOLDER);
        assert_eq!(masked["PATH"], "/usr/bin");
        assert_eq!(masked.len(), env.len());
        assert_eq!(env["GEMINI_API_KEY"], "secret");
    }

    #[test]
    fn ambient_environment_is_used() {
        let sanitizer = EnvironmentSanitizer::default();
        let env = sanitizer.build_environment(&HashMap::new());
        for key in DEFAULT_DENYLIST {
            assert!(!has(&env, key));
        }
    }

    #[test]
    fn working_directory_precedence() {
        let requested = Path::new("/requested");
        let fallback = Path::new("/fallback");
        assert_eq!(
            resolve_working_directory(Some(requested), Some(fallback)),
            PathBuf::from("/requested")
        );
        assert_eq!(
            resolve_working_directory(None, Some(fallback)),
            PathBuf::from("/fallback")
        );
        assert_eq!(
            resolve_working_directory(Some(Path::new("")), None),
            std::env::current_dir().unwrap()
        );
    }
}
