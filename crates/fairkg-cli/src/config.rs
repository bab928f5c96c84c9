//! TOML config loading for the training CLI.
//!
//! Deserializes an optional config file with a `[training]` section, then
//! merges it with CLI overrides.

use std::path::Path;

use fairkg::FairTrainingConfig;
use serde::Deserialize;

/// Top-level structure of a training TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct TrainToml {
    /// Training hyperparameters; every field is optional.
    #[serde(default)]
    pub training: TrainingOverrides,
}

/// Optional overrides for [`FairTrainingConfig`] fields plus run-level settings.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct TrainingOverrides {
    pub margin: Option<f64>,
    pub num_nce: Option<usize>,
    pub gamma: Option<f64>,
    pub d_steps: Option<usize>,
    pub sample_mask: Option<bool>,
    pub use_cross_entropy: Option<bool>,
    pub freeze_encoder: Option<bool>,
    pub filter_false_negs: Option<bool>,
    pub do_log: Option<bool>,
    pub lr: Option<f64>,
    pub disc_lr: Option<f64>,
    pub batch_size: Option<usize>,
    pub embed_dim: Option<usize>,
    pub hidden_dim: Option<usize>,
    pub num_epochs: Option<usize>,
    pub seed: Option<u64>,
    /// Epochs between checkpoint saves.
    pub checkpoint_interval: Option<usize>,
    /// Gradient norm clip applied by every optimizer.
    pub max_grad_norm: Option<f64>,
}

/// Overrides given on the command line.
///
/// Boolean flags can only switch a setting on; leaving a flag off keeps the
/// TOML or default value.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub epochs: Option<usize>,
    pub batch_size: Option<usize>,
    pub num_nce: Option<usize>,
    pub gamma: Option<f64>,
    pub d_steps: Option<usize>,
    pub seed: Option<u64>,
    pub checkpoint_interval: Option<usize>,
    pub sample_mask: bool,
    pub cross_entropy: bool,
    pub freeze_encoder: bool,
    pub filter_false_negs: bool,
}

/// Load and deserialize a `TrainToml` from a TOML file.
pub fn load_train_toml(path: &Path) -> anyhow::Result<TrainToml> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config {}: {e}", path.display()))?;
    let config: TrainToml = toml::from_str(&contents)?;
    tracing::info!(path = %path.display(), "Loaded training config");
    Ok(config)
}

/// Build a [`FairTrainingConfig`] for a dataset.
///
/// Priority chain: `FairTrainingConfig` defaults < TOML values < CLI flags.
pub fn build_training_config(
    num_users: usize,
    num_subreddits: usize,
    toml: &TrainingOverrides,
    cli: &CliOverrides,
) -> FairTrainingConfig {
    let mut config = FairTrainingConfig::new(num_users, num_subreddits);

    // Apply TOML overrides
    if let Some(v) = toml.margin {
        config.margin = v;
    }
    if let Some(v) = toml.num_nce {
        config.num_nce = v;
    }
    if let Some(v) = toml.gamma {
        config.gamma = v;
    }
    if let Some(v) = toml.d_steps {
        config.d_steps = v;
    }
    if let Some(v) = toml.sample_mask {
        config.sample_mask = v;
    }
    if let Some(v) = toml.use_cross_entropy {
        config.use_cross_entropy = v;
    }
    if let Some(v) = toml.freeze_encoder {
        config.freeze_encoder = v;
    }
    if let Some(v) = toml.filter_false_negs {
        config.filter_false_negs = v;
    }
    if let Some(v) = toml.do_log {
        config.do_log = v;
    }
    if let Some(v) = toml.lr {
        config.lr = v;
    }
    if let Some(v) = toml.disc_lr {
        config.disc_lr = v;
    }
    if let Some(v) = toml.batch_size {
        config.batch_size = v;
    }
    if let Some(v) = toml.embed_dim {
        config.embed_dim = v;
    }
    if let Some(v) = toml.hidden_dim {
        config.hidden_dim = v;
    }
    if let Some(v) = toml.num_epochs {
        config.num_epochs = v;
    }
    if let Some(v) = toml.seed {
        config.seed = v;
    }

    // CLI overrides take highest priority
    if let Some(v) = cli.epochs {
        config.num_epochs = v;
    }
    if let Some(v) = cli.batch_size {
        config.batch_size = v;
    }
    if let Some(v) = cli.num_nce {
        config.num_nce = v;
    }
    if let Some(v) = cli.gamma {
        config.gamma = v;
    }
    if let Some(v) = cli.d_steps {
        config.d_steps = v;
    }
    if let Some(v) = cli.seed {
        config.seed = v;
    }
    config.sample_mask |= cli.sample_mask;
    config.use_cross_entropy |= cli.cross_entropy;
    config.freeze_encoder |= cli.freeze_encoder;
    config.filter_false_negs |= cli.filter_false_negs;

    config
}

/// Epochs between checkpoints: CLI, then TOML, then every epoch.
pub fn checkpoint_interval(toml: &TrainingOverrides, cli: &CliOverrides) -> usize {
    cli.checkpoint_interval
        .or(toml.checkpoint_interval)
        .unwrap_or(1)
        .max(1)
}
