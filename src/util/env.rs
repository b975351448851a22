//! Environment helpers: centralized dotenv loading and ergonomic getters.
//! Call `init_env()` once early in the binary (or rely on lazy Once).
use std::sync::Once;
use tracing::{info, warn};

static INIT: Once = Once::new();

/// Load .env exactly once. Safe to call many times.
pub fn init_env() {
    INIT.call_once(|| {
        if dotenv::dotenv().is_ok() {
            return;
        }
        // Fallback to the crate root when launched from elsewhere (e.g. `cargo run` in a subdir).
        let candidate = format!("{}/.env", env!("CARGO_MANIFEST_DIR"));
        let _ = dotenv::from_filename(candidate);
    });
}

/// Get optional env var (None if unset or empty).
pub fn env_opt(key: &str) -> Option<String> {
    init_env();
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Boolean flag; accepts 1/true/on/yes (case-insensitive) as true.
pub fn env_flag(key: &str, default: bool) -> bool {
    match env_opt(key) {
        Some(raw) => {
            let v = raw.trim().to_ascii_lowercase();
            matches!(v.as_str(), "1" | "true" | "on" | "yes")
        }
        None => default,
    }
}

pub(crate) fn redact_value(key: &str, val: &str) -> String {
    let k = key.to_ascii_uppercase();
    if k.contains("PASSWORD")
        || k.contains("SECRET")
        || k.contains("KEY")
        || k.contains("TOKEN")
    {
        if val.trim().is_empty() {
            return String::new();
        }
        return "***".to_string();
    }

    let val_trim = val.trim();

    // Always redact credentials embedded in postgres DSNs even if the key isn't obviously sensitive.
    if let Ok(mut u) = url::Url::parse(val_trim) {
        let scheme = u.scheme().to_ascii_lowercase();
        if (scheme == "postgres" || scheme == "postgresql") && !u.username().is_empty() {
            let _ = u.set_username("***");
            let _ = u.set_password(Some("***"));
            return u.to_string();
        }
    }

    val_trim.to_string()
}

/// Validate required keys and log a consolidated, redacted snapshot of configuration.
/// Returns the list of missing keys (empty when everything is present).
pub fn preflight_check(title: &str, required: &[&str], also_log: &[&str]) -> Vec<String> {
    preflight_with(title, required, also_log, env_opt)
}

pub(crate) fn preflight_with<F>(
    title: &str,
    required: &[&str],
    also_log: &[&str],
    lookup: F,
) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let missing: Vec<String> = required
        .iter()
        .filter(|&&k| lookup(k).is_none())
        .map(|k| k.to_string())
        .collect();
    let snapshot: Vec<(String, String)> = required
        .iter()
        .chain(also_log.iter())
        .map(|&k| {
            let v = lookup(k).unwrap_or_default();
            (k.to_string(), redact_value(k, &v))
        })
        .collect();
    info!(target = "preflight", title, snapshot = ?snapshot, "configuration snapshot");
    if !missing.is_empty() {
        warn!(target = "preflight", title, missing = ?missing, "required configuration missing");
    }
    missing
}
