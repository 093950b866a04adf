//! Orchestrator settings.
//!
//! Loaded from a TOML or YAML file (picked by extension), then overridden by
//! `EVO_*` environment variables. Every field has a default, so an empty file
//! is a valid configuration.

use crate::error::SettingsError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorSettings {
    /// Worker count W
    pub workers: usize,
    /// Resource token ids, e.g. one per GPU
    pub resource_tokens: Vec<String>,
    /// Whether runs must hold a resource token
    pub resource_constrained: bool,
    pub poll_interval_ms: u64,
    /// Wait between the graceful stop request and the forced kill
    pub grace_period_ms: u64,
    /// Wall-clock limit per agent run
    pub execution_timeout_secs: u64,
    pub evolution: EvolutionSettings,
    pub fitness: FitnessSettings,
    pub backend: BackendSettings,
    /// Registry of known agent kinds. Empty means any kind is accepted.
    pub kinds: BTreeMap<String, KindTemplate>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            resource_tokens: (0..8).map(|i| format!("gpu-{i}")).collect(),
            resource_constrained: false,
            poll_interval_ms: 200,
            grace_period_ms: 2_000,
            execution_timeout_secs: 3_600,
            evolution: EvolutionSettings::default(),
            fitness: FitnessSettings::default(),
            backend: BackendSettings::default(),
            kinds: BTreeMap::new(),
        }
    }
}

/// Reproduction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvolutionSettings {
    /// Size of each new generation; defaults to the current cohort size
    pub population_size: Option<usize>,
    pub elite_fraction: f64,
    pub mutation_rate: f64,
    /// Mixing weight given to the first parent during crossover
    pub alpha: f64,
    /// Relative size of an unstepped numeric perturbation
    pub perturbation_scale: f64,
    pub parent_selection: ParentSelection,
    pub seed: u64,
}

impl Default for EvolutionSettings {
    fn default() -> Self {
        Self {
            population_size: None,
            elite_fraction: 0.2,
            mutation_rate: 0.1,
            alpha: 0.5,
            perturbation_scale: 0.2,
            parent_selection: ParentSelection::Random,
            seed: 42,
        }
    }
}

/// How parent pairs are drawn from the elites
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentSelection {
    /// Two distinct elites sampled with the seeded RNG
    Random,
    /// Elites paired in rank order, wrapping around
    Cycle,
}

/// How candidate code is syntax-checked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SyntaxCheck {
    /// Run the interpreter with these args followed by the source file
    Command { args: Vec<String> },
    /// Only check that brackets and quotes balance
    Delimiters,
}

/// Component weights of the composite fitness score
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FitnessWeights {
    pub syntax: f64,
    pub execution: f64,
    pub security: f64,
    pub reasoning: f64,
    pub efficiency: f64,
}

/// The fixed scoring weights; they sum to 1
pub const FITNESS_WEIGHTS: FitnessWeights = FitnessWeights {
    syntax: 0.2,
    execution: 0.3,
    security: 0.2,
    reasoning: 0.2,
    efficiency: 0.1,
};

impl Default for FitnessWeights {
    fn default() -> Self {
        FITNESS_WEIGHTS
    }
}

impl FitnessWeights {
    #[must_use]
    pub fn total(&self) -> f64 {
        self.syntax + self.execution + self.security + self.reasoning + self.efficiency
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FitnessSettings {
    pub sandbox_timeout_secs: u64,
    pub interpreter: String,
    /// Args placed before the source file when executing it
    pub interpreter_args: Vec<String>,
    pub syntax_check: SyntaxCheck,
    /// Step count that earns the full reasoning score
    pub reasoning_cap: u32,
    /// Token cost at which efficiency reaches zero
    pub cost_cap: u64,
}

impl Default for FitnessSettings {
    fn default() -> Self {
        Self {
            sandbox_timeout_secs: 5,
            interpreter: "python3".to_string(),
            interpreter_args: Vec::new(),
            syntax_check: SyntaxCheck::Command {
                args: vec!["-m".to_string(), "py_compile".to_string()],
            },
            reasoning_cap: 15,
            cost_cap: 3_000,
        }
    }
}

/// Subprocess execution backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendSettings {
    /// Default command line (program followed by args)
    pub command: Vec<String>,
    /// Per-kind command overrides
    pub commands: BTreeMap<String, Vec<String>>,
    /// Parent of every agent's working directory
    pub work_dir: PathBuf,
    /// Extra environment for agent processes
    pub env: BTreeMap<String, String>,
    /// Output lines retained per agent for log tails
    pub output_buffer_lines: usize,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            command: vec!["python3".to_string(), "agent.py".to_string()],
            commands: BTreeMap::new(),
            work_dir: std::env::temp_dir().join("evo-agents"),
            env: BTreeMap::new(),
            output_buffer_lines: 2_000,
        }
    }
}

impl BackendSettings {
    /// Command line for a given kind
    #[must_use]
    pub fn command_for(&self, kind: &str) -> &[String] {
        self.commands.get(kind).unwrap_or(&self.command)
    }
}

/// An execution template for one agent kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KindTemplate {
    pub description: String,
    /// Top-level config keys every submission of this kind must carry
    pub required_keys: Vec<String>,
}

impl OrchestratorSettings {
    /// Load a settings file and apply environment overrides.
    ///
    /// # Errors
    ///
    /// Unreadable file, unsupported extension, parse errors, bad overrides
    /// or failed validation.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        Self::load_with_env(path, std::env::vars())
    }

    /// [`OrchestratorSettings::load`] with an explicit variable set
    ///
    /// # Errors
    ///
    /// As for [`OrchestratorSettings::load`].
    pub fn load_with_env<I>(path: &Path, vars: I) -> Result<Self, SettingsError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mut settings = match ext.as_str() {
            "toml" => Self::from_toml_str(&text)?,
            "yaml" | "yml" => serde_yaml::from_str(&text)?,
            other => return Err(SettingsError::UnsupportedFormat(other.to_string())),
        };
        settings.apply_overrides(vars)?;
        settings.validate()?;
        tracing::info!(path = %path.display(), workers = settings.workers, "settings loaded");
        Ok(settings)
    }

    /// # Errors
    ///
    /// TOML syntax or schema errors.
    pub fn from_toml_str(text: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `EVO_*` overrides from the given variables.
    ///
    /// # Errors
    ///
    /// [`SettingsError::BadOverride`] when a recognised variable does not parse.
    pub fn apply_overrides<I>(&mut self, vars: I) -> Result<(), SettingsError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, SettingsError> {
            value.trim().parse().map_err(|_| SettingsError::BadOverride {
                key: key.to_string(),
                value: value.to_string(),
            })
        }

        for (key, value) in vars {
            match key.as_str() {
                "EVO_WORKERS" => self.workers = parse(&key, &value)?,
                "EVO_RESOURCE_TOKENS" => {
                    self.resource_tokens = value
                        .split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                "EVO_RESOURCE_CONSTRAINED" => {
                    self.resource_constrained = parse(&key, &value)?;
                }
                "EVO_EXECUTION_TIMEOUT_SECS" => {
                    self.execution_timeout_secs = parse(&key, &value)?;
                }
                "EVO_SEED" => self.evolution.seed = parse(&key, &value)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// # Errors
    ///
    /// [`SettingsError::Invalid`] describing the first bad field.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let invalid = |msg: &str| Err(SettingsError::Invalid(msg.to_string()));
        if self.workers == 0 {
            return invalid("workers must be at least 1");
        }
        if self.resource_constrained && self.resource_tokens.is_empty() {
            return invalid("resource_constrained requires at least one resource token");
        }
        let mut seen = std::collections::BTreeSet::new();
        if let Some(dup) = self.resource_tokens.iter().find(|t| !seen.insert(t.as_str())) {
            return Err(SettingsError::Invalid(format!("duplicate resource token `{dup}`")));
        }
        if self.poll_interval_ms == 0 {
            return invalid("poll_interval_ms must be positive");
        }
        if self.execution_timeout_secs == 0 {
            return invalid("execution_timeout_secs must be positive");
        }
        let evo = &self.evolution;
        for (name, v) in [
            ("evolution.elite_fraction", evo.elite_fraction),
            ("evolution.mutation_rate", evo.mutation_rate),
            ("evolution.alpha", evo.alpha),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(SettingsError::Invalid(format!("{name} must be within [0, 1]")));
            }
        }
        if !(evo.perturbation_scale.is_finite() && evo.perturbation_scale >= 0.0) {
            return invalid("evolution.perturbation_scale must be non-negative");
        }
        if evo.population_size == Some(0) {
            return invalid("evolution.population_size must be positive");
        }
        if self.fitness.reasoning_cap == 0 || self.fitness.cost_cap == 0 {
            return invalid("fitness caps must be positive");
        }
        if self.fitness.sandbox_timeout_secs == 0 {
            return invalid("fitness.sandbox_timeout_secs must be positive");
        }
        if self.backend.command.is_empty() || self.backend.commands.values().any(Vec::is_empty) {
            return invalid("backend commands must name a program");
        }
        Ok(())
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    #[must_use]
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    #[must_use]
    pub fn with_resource_tokens(mut self, tokens: usize) -> Self {
        self.resource_tokens = (0..tokens).map(|i| format!("gpu-{i}")).collect();
        self.resource_constrained = true;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.evolution.seed = seed;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_is_default() {
        let settings = OrchestratorSettings::from_toml_str("").unwrap();
        assert_eq!(settings, OrchestratorSettings::default());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn toml_sections_parse() {
        let text = r#"
            workers = 2
            resource_constrained = true
            resource_tokens = ["cuda:0", "cuda:1"]

            [evolution]
            elite_fraction = 0.5
            parent_selection = "cycle"

            [fitness]
            interpreter = "sh"
            syntax_check = { mode = "command", args = ["-n"] }

            [kinds.nanogpt]
            required_keys = ["lr"]
        "#;
        let settings = OrchestratorSettings::from_toml_str(text).unwrap();
        assert_eq!(settings.workers, 2);
        assert_eq!(settings.resource_tokens, vec!["cuda:0", "cuda:1"]);
        assert_eq!(settings.evolution.parent_selection, ParentSelection::Cycle);
        assert_eq!(
            settings.fitness.syntax_check,
            SyntaxCheck::Command { args: vec!["-n".into()] }
        );
        assert_eq!(settings.kinds["nanogpt"].required_keys, vec!["lr"]);
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert!(OrchestratorSettings::from_toml_str("wrokers = 3").is_err());
    }

    #[test]
    fn env_overrides() {
        let mut settings = OrchestratorSettings::default();
        settings
            .apply_overrides([
                ("EVO_WORKERS".to_string(), "7".to_string()),
                ("EVO_RESOURCE_TOKENS".to_string(), "a, b,".to_string()),
                ("HOME".to_string(), "/root".to_string()),
            ])
            .unwrap();
        assert_eq!(settings.workers, 7);
        assert_eq!(settings.resource_tokens, vec!["a", "b"]);

        let err = settings
            .apply_overrides([("EVO_SEED".to_string(), "x".to_string())])
            .unwrap_err();
        assert!(matches!(err, SettingsError::BadOverride { .. }));
    }

    #[test]
    fn validation_catches_bad_values() {
        assert!(OrchestratorSettings::default().with_workers(0).validate().is_err());

        let mut s = OrchestratorSettings::default();
        s.evolution.mutation_rate = 1.5;
        assert!(s.validate().is_err());

        let mut s = OrchestratorSettings::default();
        s.resource_constrained = true;
        s.resource_tokens.clear();
        assert!(s.validate().is_err());
    }

    #[test]
    fn load_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("evo.yaml");
        std::fs::write(&yaml, "workers: 3\nevolution:\n  seed: 9\n").unwrap();
        let settings = OrchestratorSettings::load_with_env(&yaml, Vec::new()).unwrap();
        assert_eq!(settings.workers, 3);
        assert_eq!(settings.evolution.seed, 9);

        let json = dir.path().join("evo.json");
        std::fs::write(&json, "{}").unwrap();
        assert!(matches!(
            OrchestratorSettings::load_with_env(&json, Vec::new()),
            Err(SettingsError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn load_applies_given_overrides_only() {
        let dir = tempfile::tempdir().unwrap();
        let toml = dir.path().join("evo.toml");
        std::fs::write(&toml, "workers = 3\n").unwrap();
        let settings = OrchestratorSettings::load_with_env(
            &toml,
            [("EVO_WORKERS".to_string(), "5".to_string())],
        )
        .unwrap();
        assert_eq!(settings.workers, 5);
    }

    #[test]
    fn duplicate_resource_tokens_are_rejected() {
        let mut s = OrchestratorSettings::default();
        s.resource_constrained = true;
        s.resource_tokens = vec!["gpu-0".to_string(), "gpu-0".to_string()];
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate resource token `gpu-0`"), "{err}");

        let mut s = OrchestratorSettings::default();
        s.apply_overrides([("EVO_RESOURCE_TOKENS".to_string(), "a,b,a".to_string())])
            .unwrap();
        assert!(s.validate().is_err());
    }

    #[test]
    fn fitness_weights_are_fixed() {
        let text = "[fitness.weights]\nsecurity = 0.0\nsyntax = 5.0\n";
        assert!(OrchestratorSettings::from_toml_str(text).is_err());
        assert!((FITNESS_WEIGHTS.total() - 1.0).abs() < 1e-12);
        assert_eq!(FitnessWeights::default(), FITNESS_WEIGHTS);
    }
}
