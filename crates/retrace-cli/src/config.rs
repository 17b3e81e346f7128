//! Layered settings and `retrace config`.
//!
//! Later layers win: defaults, `<config_dir>/retrace/config.json`,
//! `<repo>/.retrace/config.json`, environment, command-line flags.
//! Keys use dot notation (`llm.model`) and are stored nested.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use clap::Subcommand;
use retrace_core::{RetracePaths, DEFAULT_CONTEXT_TURNS, DEFAULT_MAX_COMMITS};
use retrace_llm::LlmConfig;
use serde_json::{Map, Value};

pub const KNOWN_KEYS: &[&str] = &[
    "llm.endpoint",
    "llm.model",
    "llm.timeout_secs",
    "llm.max_retries",
    "llm.max_tokens",
    "backtrack.max_commits",
    "backtrack.context_turns",
];

// ── Settings ──

#[derive(Debug, Clone)]
pub struct Settings {
    pub llm: LlmConfig,
    pub max_commits: usize,
    pub context_turns: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            max_commits: DEFAULT_MAX_COMMITS,
            context_turns: DEFAULT_CONTEXT_TURNS,
        }
    }
}

impl Settings {
    /// Defaults, user file, repo file, then process environment.
    pub fn load(paths: &RetracePaths) -> anyhow::Result<Self> {
        let user = match dirs::config_dir() {
            Some(dir) => read_config(&dir.join("retrace").join("config.json"))?,
            None => Map::new(),
        };
        let repo = read_config(&paths.config_json)?;
        Self::resolve(&[&user, &repo], |name| std::env::var(name).ok())
    }

    pub fn resolve(
        layers: &[&Map<String, Value>],
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let mut settings = Self::default();
        for layer in layers {
            settings.apply(layer)?;
        }
        settings.apply_env(env);
        Ok(settings)
    }

    fn apply(&mut self, config: &Map<String, Value>) -> anyhow::Result<()> {
        if let Some(v) = string_at(config, "llm.endpoint")? {
            self.llm.endpoint = v;
        }
        if let Some(v) = string_at(config, "llm.model")? {
            self.llm.model = v;
        }
        if let Some(v) = u64_at(config, "llm.timeout_secs")? {
            self.llm.timeout = Duration::from_secs(v);
        }
        if let Some(v) = u64_at(config, "llm.max_retries")? {
            self.llm.max_retries = u32::try_from(v).unwrap_or(u32::MAX);
        }
        if let Some(v) = u64_at(config, "llm.max_tokens")? {
            self.llm.max_tokens = Some(u32::try_from(v).unwrap_or(u32::MAX));
        }
        if let Some(v) = u64_at(config, "backtrack.max_commits")? {
            if v == 0 {
                anyhow::bail!("config backtrack.max_commits must be at least 1");
            }
            self.max_commits = usize::try_from(v).unwrap_or(usize::MAX);
        }
        if let Some(v) = u64_at(config, "backtrack.context_turns")? {
            self.context_turns = usize::try_from(v).unwrap_or(usize::MAX);
        }
        Ok(())
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| env(name).filter(|v| !v.trim().is_empty());
        if let Some(key) = get("RETRACE_API_KEY").or_else(|| get("OPENAI_API_KEY")) {
            self.llm.api_key = Some(key);
        }
        if let Some(model) = get("RETRACE_MODEL") {
            self.llm.model = model;
        }
        if let Some(endpoint) = get("RETRACE_ENDPOINT") {
            self.llm.endpoint = endpoint;
        }
    }
}

/// Read a raw JSON value using dot-notation keys.
pub fn config_value<'a>(config: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    let mut parts = key.split('.');
    let mut current = config.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

fn string_at(config: &Map<String, Value>, key: &str) -> anyhow::Result<Option<String>> {
    match config_value(config, key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => anyhow::bail!("config {key} must be a string, got {other}"),
    }
}

fn u64_at(config: &Map<String, Value>, key: &str) -> anyhow::Result<Option<u64>> {
    match config_value(config, key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .with_context(|| format!("config {key} must be a non-negative integer, got {v}")),
    }
}

// ── File I/O ──

/// Read a config file. Missing file is an empty map.
pub fn read_config(path: &Path) -> anyhow::Result<Map<String, Value>> {
    if !path.exists() {
        return Ok(Map::new());
    }
    let content =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let val: Value = serde_json::from_str(&content)
        .with_context(|| format!("parse {}", path.display()))?;
    match val {
        Value::Object(map) => Ok(map),
        _ => anyhow::bail!("{} must contain a JSON object", path.display()),
    }
}

fn write_config(path: &Path, config: &Map<String, Value>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(config)?;
    write_atomic(path, json.as_bytes())
}

/// Write via a temp file in the same directory, then rename over `path`.
pub fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("no parent dir for {}", path.display()))?;
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.persist(path)?;
    Ok(())
}

/// Parse a string value into an appropriate JSON value (bool/number/string).
fn parse_value(s: &str) -> Value {
    match s {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if let Ok(n) = s.parse::<i64>() {
                Value::Number(n.into())
            } else if let Ok(f) = s.parse::<f64>() {
                serde_json::json!(f)
            } else {
                Value::String(s.to_string())
            }
        }
    }
}

fn set_path(config: &mut Map<String, Value>, key: &str, value: Value) -> anyhow::Result<()> {
    let (parents, leaf) = match key.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, key),
    };
    let mut node = config;
    for part in parents.into_iter().flat_map(|p| p.split('.')) {
        let entry = node
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        node = match entry {
            Value::Object(map) => map,
            other => anyhow::bail!("cannot set {key}: {part} is already {other}"),
        };
    }
    node.insert(leaf.to_string(), value);
    Ok(())
}

/// Every leaf as `(dot.key, value)`, in map order.
fn flatten(config: &Map<String, Value>) -> Vec<(String, &Value)> {
    fn walk<'a>(prefix: &str, map: &'a Map<String, Value>, out: &mut Vec<(String, &'a Value)>) {
        for (k, v) in map {
            let key = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            match v {
                Value::Object(inner) if !inner.is_empty() => walk(&key, inner, out),
                _ => out.push((key, v)),
            }
        }
    }
    let mut out = Vec::new();
    walk("", config, &mut out);
    out
}

// ── CLI Schema ──

#[derive(Subcommand)]
pub enum ConfigCmd {
    /// Set a config value in .retrace/config.json
    Set {
        /// Config key (e.g. llm.model)
        key: String,
        /// Config value (true/false/number/string)
        value: String,
    },
    /// Get a config value
    Get {
        /// Config key
        key: String,
    },
    /// List all config values
    List,
}

// ── Dispatch ──

pub fn run(cmd: ConfigCmd, repo_root: &Path) -> anyhow::Result<()> {
    let paths = RetracePaths::discover(repo_root);
    match cmd {
        ConfigCmd::Set { key, value } => set(&paths, &key, &value),
        ConfigCmd::Get { key } => get(&paths, &key),
        ConfigCmd::List => list(&paths),
    }
}

// ── Command Implementations ──

/// `retrace config set <key> <value>`
pub fn set(paths: &RetracePaths, key: &str, value: &str) -> anyhow::Result<()> {
    if key.ends_with("api_key") {
        anyhow::bail!("API keys are read from RETRACE_API_KEY or OPENAI_API_KEY, not config files");
    }
    if !KNOWN_KEYS.contains(&key) {
        anyhow::bail!("unknown config key {key} (known: {})", KNOWN_KEYS.join(", "));
    }
    let mut config = read_config(&paths.config_json)?;
    set_path(&mut config, key, parse_value(value))?;
    // Reject values the loader would refuse later.
    Settings::resolve(&[&config], |_| None)?;
    write_config(&paths.config_json, &config)?;
    println!("{key} = {value}");
    Ok(())
}

/// `retrace config get <key>`
pub fn get(paths: &RetracePaths, key: &str) -> anyhow::Result<()> {
    let config = read_config(&paths.config_json)?;
    match config_value(&config, key) {
        Some(val) => println!("{val}"),
        None => println!("(not set)"),
    }
    Ok(())
}

/// `retrace config list`
pub fn list(paths: &RetracePaths) -> anyhow::Result<()> {
    let config = read_config(&paths.config_json)?;
    let entries = flatten(&config);
    if entries.is_empty() {
        println!("(no config set)");
    } else {
        for (k, v) in entries {
            println!("{k} = {v}");
        }
    }
    Ok(())
}
