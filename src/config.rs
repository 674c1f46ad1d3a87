use serde::Deserialize;
use std::{env, fs, path::PathBuf, time::Duration};

use crate::types::ModuleId;

/// Raw shape of `nexus.json`. Every field is optional; missing values fall
/// back to [`EngineConfig::default`].
#[derive(Debug, Default, Deserialize)]
pub struct NexusJsonConfig {
    #[serde(default)]
    pub modules_dir: Option<String>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub unload_grace_ms: Option<u64>,
    #[serde(default)]
    pub default_task_timeout_secs: Option<u64>,
    #[serde(default)]
    pub default_max_retries: Option<u32>,
    #[serde(default)]
    pub autoload: Option<Vec<String>>,
    #[serde(default)]
    pub api_bind: Option<String>,
}

/// Resolved engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub modules_dir: PathBuf,
    pub workers: usize,
    pub unload_grace: Duration,
    /// Deadline applied to tasks that do not carry their own; `None` disables it.
    pub default_task_timeout: Option<Duration>,
    pub default_max_retries: u32,
    pub autoload: Vec<ModuleId>,
    pub api_bind: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            modules_dir: env::var("NEXUS_MODULES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("modules")),
            workers: 3,
            unload_grace: Duration::from_secs(30),
            default_task_timeout: Some(Duration::from_secs(300)),
            default_max_retries: 0,
            autoload: vec![ModuleId::new("command_executor")],
            api_bind: "127.0.0.1:8100".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the resolved `nexus.json`, or defaults when no
    /// file exists.
    pub fn load() -> anyhow::Result<Self> {
        match resolve_config_path() {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        let cfg: NexusJsonConfig = serde_json::from_str(raw)?;
        Self::from_json(expand_config(cfg))
    }

    fn from_json(cfg: NexusJsonConfig) -> anyhow::Result<Self> {
        let mut out = Self::default();

        if let Some(dir) = cfg.modules_dir {
            out.modules_dir = PathBuf::from(dir);
        }
        if let Some(workers) = cfg.workers {
            if workers == 0 {
                return Err(anyhow::anyhow!("`workers` must be at least 1"));
            }
            out.workers = workers;
        }
        if let Some(ms) = cfg.unload_grace_ms {
            out.unload_grace = Duration::from_millis(ms);
        }
        if let Some(secs) = cfg.default_task_timeout_secs {
            out.default_task_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(retries) = cfg.default_max_retries {
            out.default_max_retries = retries;
        }
        if let Some(autoload) = cfg.autoload {
            out.autoload = autoload.into_iter().map(ModuleId::from).collect();
        }
        if let Some(bind) = cfg.api_bind {
            out.api_bind = bind;
        }

        Ok(out)
    }
}

pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(p) = env::var("NEXUS_CONFIG") {
        return Some(PathBuf::from(p));
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg).join("nexus").join("nexus.json");
        if candidate.exists() {
            return Some(candidate);
        }
    }

    let candidate = PathBuf::from("nexus.json");
    if candidate.exists() {
        return Some(candidate);
    }

    None
}

fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            if let Ok(val) = env::var(&name) {
                out.push_str(&val);
            } else {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            }
        } else {
            out.push(ch);
        }
    }

    out
}

fn expand_config(cfg: NexusJsonConfig) -> NexusJsonConfig {
    let mut cfg = cfg;

    if let Some(dir) = cfg.modules_dir.as_mut() {
        *dir = expand_env_vars(dir);
    }
    if let Some(bind) = cfg.api_bind.as_mut() {
        *bind = expand_env_vars(bind);
    }
    cfg.autoload = cfg
        .autoload
        .map(|ids| ids.into_iter().map(|id| expand_env_vars(&id)).collect());

    cfg
}
