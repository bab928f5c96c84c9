//! Training and dataset summary pipelines.

use std::path::PathBuf;
use std::time::Instant;

use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;
use burn::grad_clipping::GradientClippingConfig;
use burn::optim::AdamConfig;
use burn::prelude::*;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;

use fairkg::training::mask::MaskSet;
use fairkg::training::metrics::{
    JsonlMetricLogger, MetricLogger, MetricsHistory, MultiLogger, TracingMetricLogger,
};
use fairkg::training::trainer::{discriminator_metric, CheckpointMeta, NCE_LOSS_METRIC};
use fairkg::{
    AdversarialTrainer, AttributeDiscriminator, AttributeDiscriminatorConfig, FairSlot,
    SensitiveAttribute, TransEncoder, TransEncoderConfig, TripletDataset, TripletLoader,
};

use crate::config::{build_training_config, checkpoint_interval, load_train_toml, CliOverrides, TrainToml};

type TrainBackend = Autodiff<NdArray<f32>>;

/// Arguments for the `train` subcommand.
#[derive(Debug)]
pub struct TrainArgs {
    /// Path to the triplet text file.
    pub triplets: PathBuf,
    /// One JSON file per sensitive attribute.
    pub attributes: Vec<PathBuf>,
    /// Optional training config TOML file.
    pub config: Option<PathBuf>,
    /// Checkpoint directory.
    pub output_dir: PathBuf,
    /// Optional JSONL metrics file.
    pub metrics: Option<PathBuf>,
    pub overrides: CliOverrides,
}

/// Arguments for the `summary` subcommand.
#[derive(Debug)]
pub struct SummaryArgs {
    pub triplets: PathBuf,
    /// Output as JSON instead of human-readable text.
    pub json: bool,
}

/// Logs into an in-memory history while forwarding to another sink.
struct Recording<'a, L: MetricLogger> {
    history: &'a mut MetricsHistory,
    inner: &'a mut L,
}

impl<L: MetricLogger> MetricLogger for Recording<'_, L> {
    fn log_metric(&mut self, name: &str, value: f64, step: usize) {
        self.history.log_metric(name, value, step);
        self.inner.log_metric(name, value, step);
    }
}

/// Train an encoder against one discriminator per sensitive attribute.
pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    let start = Instant::now();

    // 1. Load config
    let toml = match &args.config {
        Some(path) => load_train_toml(path)?,
        None => TrainToml::default(),
    };

    // 2. Load data
    let dataset = TripletDataset::load(&args.triplets)?;
    let attributes = args
        .attributes
        .iter()
        .map(|path| SensitiveAttribute::load(path))
        .collect::<anyhow::Result<Vec<_>>>()?;
    if attributes.is_empty() {
        tracing::warn!("No sensitive attributes given, training the encoder alone");
    }
    if let Some(short) = attributes
        .iter()
        .find(|a| a.labels.len() < dataset.num_users())
    {
        anyhow::bail!(
            "attribute '{}' labels {} users but the dataset has {}",
            short.name,
            short.labels.len(),
            dataset.num_users()
        );
    }

    let config = build_training_config(
        dataset.num_users(),
        dataset.num_subreddits(),
        &toml.training,
        &args.overrides,
    )
    .with_num_relations(dataset.num_relations());
    let interval = checkpoint_interval(&toml.training, &args.overrides);
    std::fs::create_dir_all(&args.output_dir)?;
    config
        .save(args.output_dir.join("config.json"))
        .map_err(|e| anyhow::anyhow!("Failed to save config: {e}"))?;

    // 3. Build models and optimizers
    let device = Default::default();
    let mut adam = AdamConfig::new();
    if let Some(norm) = toml.training.max_grad_norm {
        adam = adam.with_grad_clipping(Some(GradientClippingConfig::Norm(norm as f32)));
    }

    let encoder = TransEncoderConfig::new(dataset.num_users(), dataset.num_subreddits())
        .with_num_relations(dataset.num_relations())
        .with_embed_dim(config.embed_dim)
        .with_num_filters(attributes.len())
        .init::<TrainBackend>(&device);
    let attribute_names: Vec<String> = attributes.iter().map(|a| a.name.clone()).collect();
    let slots = attributes
        .into_iter()
        .enumerate()
        .map(|(i, attribute)| {
            let disc = AttributeDiscriminatorConfig::new(config.embed_dim, attribute.num_classes)
                .with_hidden_dim(config.hidden_dim)
                .init::<TrainBackend>(&device);
            let optim = adam.init::<TrainBackend, AttributeDiscriminator<TrainBackend>>();
            FairSlot::new(attribute, i, disc, optim)
        })
        .collect::<Vec<_>>();
    let masks = if config.sample_mask {
        MaskSet::all_combinations(slots.len())
    } else {
        MaskSet::all_active(slots.len())
    };
    let known = config.filter_false_negs.then(|| dataset.known_triplets());

    let mut trainer = AdversarialTrainer::new(
        config.clone(),
        encoder,
        adam.init::<TrainBackend, TransEncoder<TrainBackend>>(),
        slots,
        masks,
        device,
    )?;
    if let Some(known) = known {
        tracing::info!(known = known.len(), "False-negative flagging enabled");
        trainer = trainer.with_known_triplets(known);
    }

    // 4. Metric sinks
    let mut logger = MultiLogger::new().with(TracingMetricLogger);
    if let Some(path) = &args.metrics {
        logger = logger.with(JsonlMetricLogger::create(path)?);
    }
    let mut history = MetricsHistory::new();

    let loader = TripletLoader::new(dataset, config.batch_size);
    tracing::info!(
        triplets = loader.dataset_len(),
        batches_per_epoch = loader.num_batches(),
        epochs = config.num_epochs,
        attributes = attribute_names.len(),
        "Starting adversarial training"
    );

    // 5. Train with progress bar
    let mut rng = StdRng::seed_from_u64(config.seed);
    let pb = ProgressBar::new(config.num_epochs as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    for epoch in 0..config.num_epochs {
        let mut recording = Recording {
            history: &mut history,
            inner: &mut logger,
        };
        let report = trainer.train_epoch(&loader, epoch, &mut recording, &mut rng)?;
        if let Some(loss) = report.last_nce_loss {
            pb.set_message(format!("nce={loss:.4}"));
        }

        let last = epoch + 1 == config.num_epochs;
        if last || (epoch + 1) % interval == 0 {
            let meta = CheckpointMeta {
                epoch,
                batches: report.batches,
                last_nce_loss: report.last_nce_loss,
                attributes: attribute_names.clone(),
            };
            trainer.save_checkpoint(&args.output_dir.join(format!("epoch_{epoch}")), &meta)?;
        }
        pb.inc(1);
    }
    pb.finish_with_message("done");

    // 6. Print summary
    let elapsed = start.elapsed();
    println!("\n--- Training Summary ---");
    println!("Epochs: {}", config.num_epochs);
    if let Some(loss) = history.last(NCE_LOSS_METRIC) {
        println!("Final NCE loss: {loss:.4}");
    }
    for name in &attribute_names {
        if let Some(acc) = history.last(&discriminator_metric(name)) {
            println!("Final {name} discriminator accuracy: {acc:.1}%");
        }
    }
    println!("Checkpoints: {}", args.output_dir.display());
    if let Some(path) = &args.metrics {
        println!("Metrics: {}", path.display());
    }
    println!("Elapsed: {:.1}s", elapsed.as_secs_f64());

    Ok(())
}

/// Print statistics from a triplet file.
pub fn run_summary(args: SummaryArgs) -> anyhow::Result<()> {
    let dataset = TripletDataset::load(&args.triplets)?;
    let summary = dataset.summary();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("--- Triplet Summary ---");
    println!("File: {}", args.triplets.display());
    println!("Triplets: {}", summary.triplets);
    println!(
        "Users: {} ids, {} distinct",
        summary.num_users, summary.distinct_users
    );
    println!(
        "Subreddits: {} ids, {} distinct",
        summary.num_subreddits, summary.distinct_subreddits
    );
    println!("Relations: {}", summary.num_relations);

    Ok(())
}
