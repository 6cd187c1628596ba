//! Model catalog: size estimates, fallback chains, and OOM detection
//!
//! The catalog is built once from configuration and immutable afterwards.
//! It answers three questions for the scheduler and router:
//!
//! - roughly how much memory does a model need (`approx_size`)
//! - does a model fit on a node right now (`fits`)
//! - which smaller model should replace one that keeps failing
//!   (`fallback_after`)
//!
//! plus the OOM classifier applied to backend error text. Task kinds are
//! opaque tags supplied by the caller; the catalog only uses them as chain
//! keys.

use crate::config::CatalogConfig;
use crate::node::Node;
use crate::Result;
use regex::RegexSet;
use std::collections::HashMap;

const GIB: u64 = 1 << 30;

fn gib(value: f64) -> u64 {
    (value * GIB as f64) as u64
}

/// Built-in size estimates keyed by exact model name
fn builtin_sizes() -> Vec<(&'static str, u64)> {
    vec![
        ("tinyllama", gib(1.5)),
        ("qwen2.5:0.5b", gib(1.0)),
        ("qwen2.5:1.5b", gib(2.5)),
        ("qwen2.5:3b", gib(5.0)),
        ("qwen2.5:14b", gib(12.0)),
        ("qwen2.5-coder:7b", gib(6.5)),
        ("qwen2.5-coder:14b", gib(13.0)),
        ("deepseek-coder:6.7b", gib(7.0)),
        ("deepseek-coder:latest", gib(14.0)),
        ("codellama:7b", gib(7.5)),
        ("codellama:13b", gib(14.5)),
        ("phi", gib(2.7)),
        ("gemma:2b", gib(3.0)),
        ("codegemma:2b", gib(3.2)),
    ]
}

/// Parameter-count substring patterns, most specific first so `6.7b` wins
/// over `7b` and `1.5b` over `5b`
fn builtin_patterns() -> Vec<(&'static str, u64)> {
    vec![
        ("405b", gib(230.0)),
        ("70b", gib(40.0)),
        ("72b", gib(42.0)),
        ("34b", gib(22.0)),
        ("32b", gib(20.0)),
        ("30b", gib(19.0)),
        ("27b", gib(17.0)),
        ("14b", gib(13.0)),
        ("13b", gib(14.0)),
        ("12b", gib(9.0)),
        ("11b", gib(8.5)),
        ("9b", gib(8.0)),
        ("8b", gib(7.0)),
        ("6.7b", gib(7.0)),
        ("7b", gib(6.5)),
        ("4b", gib(4.0)),
        ("3b", gib(3.3)),
        ("2b", gib(2.2)),
        ("1.5b", gib(2.5)),
        ("1.7b", gib(2.5)),
        ("1.1b", gib(1.5)),
        ("0.5b", gib(1.0)),
        ("1b", gib(1.5)),
    ]
}

/// Built-in fallback chains, largest model first
fn builtin_chains() -> HashMap<String, Vec<String>> {
    let chains = [
        (
            "generate",
            vec![
                "qwen2.5-coder:14b",
                "deepseek-coder:latest",
                "qwen2.5-coder:7b",
                "qwen2.5:1.5b",
                "tinyllama",
            ],
        ),
        (
            "debug",
            vec![
                "qwen2.5-coder:14b",
                "qwen2.5-coder:7b",
                "qwen2.5:1.5b",
                "tinyllama",
            ],
        ),
        ("explain", vec!["qwen2.5:3b", "qwen2.5:1.5b", "tinyllama"]),
    ];

    chains
        .into_iter()
        .map(|(task, chain)| {
            (
                task.to_string(),
                chain.into_iter().map(String::from).collect(),
            )
        })
        .collect()
}

/// Default phrases that indicate an out-of-memory failure
const DEFAULT_OOM_PATTERNS: &[&str] = &[
    "out of memory",
    "oom",
    "cannot allocate",
    "resource exhausted",
    "killed",
    "terminated",
    "signal: killed",
];

/// Result of a model-to-node fit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitCheck {
    /// Whether the model is believed to fit
    pub fits: bool,

    /// False when the size or the node's memory is unknown; such checks
    /// always pass but carry no weight
    pub confident: bool,
}

impl FitCheck {
    fn confident(fits: bool) -> Self {
        Self {
            fits,
            confident: true,
        }
    }

    fn unknown() -> Self {
        Self {
            fits: true,
            confident: false,
        }
    }
}

/// Immutable model knowledge base
#[derive(Debug)]
pub struct ModelCatalog {
    /// Exact-name sizes (built-ins merged with config overrides)
    sizes: HashMap<String, u64>,

    /// Substring patterns consulted when no exact name matches
    patterns: Vec<(String, u64)>,

    /// Fallback chains keyed by task kind
    chains: HashMap<String, Vec<String>>,

    /// OOM phrase set, matched case-insensitively
    oom: RegexSet,

    /// Fraction of free memory a model may occupy
    headroom: f64,
}

impl ModelCatalog {
    /// Build a catalog from configuration, merging built-in defaults
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        let mut sizes: HashMap<String, u64> = builtin_sizes()
            .into_iter()
            .map(|(name, size)| (name.to_string(), size))
            .collect();
        sizes.extend(config.model_sizes.clone());

        let patterns = builtin_patterns()
            .into_iter()
            .map(|(pattern, size)| (pattern.to_string(), size))
            .collect();

        let mut chains = builtin_chains();
        for (task, chain) in &config.fallback_chains {
            chains.insert(task.clone(), chain.clone());
        }

        let oom_patterns: Vec<String> = if config.oom_patterns.is_empty() {
            DEFAULT_OOM_PATTERNS.iter().map(|p| p.to_string()).collect()
        } else {
            config.oom_patterns.clone()
        };
        let oom = RegexSet::new(oom_patterns.iter().map(|p| format!("(?i){}", p)))
            .map_err(|e| crate::Error::config(format!("invalid catalog.oom_patterns: {}", e)))?;

        Ok(Self {
            sizes,
            patterns,
            chains,
            oom,
            headroom: config.headroom,
        })
    }

    /// Estimated memory footprint of a model, or `None` when unknown
    pub fn approx_size(&self, model: &str) -> Option<u64> {
        if let Some(size) = self.sizes.get(model) {
            return Some(*size);
        }

        let lowered = model.to_lowercase();
        self.patterns
            .iter()
            .find(|(pattern, _)| lowered.contains(pattern.as_str()))
            .map(|(_, size)| *size)
    }

    /// Whether `model` fits on `node` right now
    ///
    /// GPU nodes are checked against free VRAM, everything else against
    /// free RAM. Unknown model sizes and unknown node memory never exclude
    /// a node; they produce a low-confidence pass instead.
    pub fn fits(&self, model: &str, node: &Node) -> FitCheck {
        let size = match self.approx_size(model) {
            Some(size) => size,
            None => return FitCheck::unknown(),
        };

        let free = if node.is_gpu() {
            if node.vram_total_bytes == 0 {
                return FitCheck::unknown();
            }
            node.vram_free_bytes
        } else {
            if node.ram_total_bytes == 0 {
                return FitCheck::unknown();
            }
            node.ram_free_bytes
        };

        FitCheck::confident(size as f64 <= free as f64 * self.headroom)
    }

    /// The next smaller model after `model` on the task's chain
    ///
    /// When `model` is not on the chain, the walk starts at the chain head.
    pub fn fallback_after(&self, model: &str, task_kind: &str) -> Option<String> {
        let chain = self.chains.get(task_kind)?;

        match chain.iter().position(|m| m == model) {
            Some(pos) => chain.get(pos + 1).cloned(),
            None => chain.first().filter(|m| m.as_str() != model).cloned(),
        }
    }

    /// Whether error text looks like an out-of-memory failure
    pub fn looks_like_oom(&self, text: &str) -> bool {
        self.oom.is_match(text)
    }
}
