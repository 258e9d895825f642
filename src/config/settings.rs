//! Runtime settings read from the environment (a `.env` file is honoured via dotenvy).

use crate::config::AccessPolicy;
use crate::error::ConfigError;
use std::path::PathBuf;

pub const DEFAULT_PREFIX: &str = "/json";
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct GatewaySettings {
    /// Exposes debug messages and tracebacks to staff, and skips CSRF checks.
    pub debug: bool,
    /// Policy for actions an entity type does not declare.
    pub default_policy: AccessPolicy,
    pub csrf_secret: String,
    pub session_cookie: String,
    pub template_dir: PathBuf,
    pub body_limit: usize,
    /// Mount point of the attribute routes.
    pub prefix: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        GatewaySettings {
            debug: false,
            default_policy: AccessPolicy::Disabled,
            csrf_secret: String::new(),
            session_cookie: "sessionid".into(),
            template_dir: PathBuf::from("templates"),
            body_limit: DEFAULT_BODY_LIMIT,
            prefix: DEFAULT_PREFIX.into(),
        }
    }
}

impl GatewaySettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let d = GatewaySettings::default();
        let settings = GatewaySettings {
            debug: env_flag("GATEWAY_DEBUG"),
            default_policy: match env_opt("GATEWAY_DEFAULT_POLICY") {
                Some(s) => s
                    .parse()
                    .map_err(|e: String| ConfigError::Validation(format!("GATEWAY_DEFAULT_POLICY: {}", e)))?,
                None => d.default_policy,
            },
            csrf_secret: env_opt("GATEWAY_CSRF_SECRET").unwrap_or(d.csrf_secret),
            session_cookie: env_opt("GATEWAY_SESSION_COOKIE").unwrap_or(d.session_cookie),
            template_dir: env_opt("GATEWAY_TEMPLATES").map(PathBuf::from).unwrap_or(d.template_dir),
            body_limit: match env_opt("GATEWAY_BODY_LIMIT") {
                Some(s) => s
                    .parse()
                    .map_err(|_| ConfigError::Validation(format!("GATEWAY_BODY_LIMIT: not a size in bytes: '{}'", s)))?,
                None => d.body_limit,
            },
            prefix: env_opt("GATEWAY_PREFIX").unwrap_or(d.prefix),
        };
        if !settings.debug && settings.csrf_secret.is_empty() {
            tracing::warn!("GATEWAY_CSRF_SECRET is empty; every mutating request will be rejected");
        }
        Ok(settings)
    }
}

pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn env_flag(key: &str) -> bool {
    env_opt(key)
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}
