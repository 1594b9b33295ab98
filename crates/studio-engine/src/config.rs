use std::env;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use studio_contracts::StudioError;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image-preview";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Checked in order; the first non-empty value wins.
pub const API_KEY_VARS: &[&str] = &["API_KEY", "GEMINI_API_KEY", "GOOGLE_API_KEY"];

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    /// `None` leaves the call unbounded.
    pub request_timeout: Option<Duration>,
}

impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl GeminiConfig {
    pub fn from_env() -> Result<Self, StudioError> {
        Self::from_lookup(non_empty_env)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StudioError> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let Some(api_key) = API_KEY_VARS.iter().find_map(|key| get(*key)) else {
            return Err(StudioError::config(format!(
                "{} environment variable is not set",
                API_KEY_VARS.join(" or ")
            )));
        };
        let api_base = get("GEMINI_API_BASE")
            .map(|value| value.trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let model = get("PHOTO_STUDIO_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let request_timeout = match get("GEMINI_REQUEST_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: f64 = raw.parse().map_err(|_| {
                    StudioError::config(format!(
                        "GEMINI_REQUEST_TIMEOUT_SECS must be a number of seconds, got '{raw}'"
                    ))
                })?;
                if !secs.is_finite() || secs <= 0.0 {
                    return Err(StudioError::config(
                        "GEMINI_REQUEST_TIMEOUT_SECS must be positive",
                    ));
                }
                Some(Duration::from_secs_f64(secs))
            }
            None => None,
        };

        Ok(Self {
            api_key,
            api_base,
            model,
            request_timeout,
        })
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        if let Some(model) = model.filter(|value| !value.trim().is_empty()) {
            self.model = model.trim().to_string();
        }
        self
    }
}

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Loads `path` into the process environment without overriding variables
/// that are already set. A missing file is not an error; a line that does not
/// parse is. Returns the keys that were applied, in file order.
pub fn load_dotenv(path: &Path) -> Result<Vec<String>, StudioError> {
    let entries = match dotenvy::from_path_iter(path) {
        Ok(entries) => entries,
        Err(err) if err.not_found() => return Ok(Vec::new()),
        Err(err) => {
            return Err(StudioError::config(format!(
                "failed reading {}: {err}",
                path.display()
            )))
        }
    };
    let mut applied = Vec::new();
    for entry in entries {
        let (key, value) = entry
            .map_err(|err| StudioError::config(format!("{}: {err}", path.display())))?;
        if env::var_os(&key).is_some() {
            continue;
        }
        env::set_var(&key, value);
        applied.push(key);
    }
    Ok(applied)
}
