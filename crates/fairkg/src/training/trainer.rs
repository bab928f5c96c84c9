//! Adversarial fairness training loop.
//!
//! Ties together the negative sampler, margin loss, discriminator masking and
//! metrics. Each batch alternates one encoder update (margin loss plus a
//! penalty for every discriminator that can still read the sensitive
//! attribute) with `d_steps` rounds of discriminator updates on the detached
//! embeddings.

use std::path::Path;
use std::time::Instant;

use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::AutodiffBackend;
use rand::Rng;

use crate::error::TrainError;
use crate::model::bridge::{labels_to_tensor, tensor_to_f64, triplets_to_tensor};
use crate::model::discriminator::Discriminator;
use crate::model::encoder::{KgEncoder, TransEncoder, TransEncoderConfig};
use crate::training::data::{KnownTriplets, SensitiveAttribute, Triplet, TripletLoader};
use crate::training::loss::MarginRankingLoss;
use crate::training::mask::{compress, MaskSet};
use crate::training::metrics::{AccuracyTally, MetricLogger};
use crate::training::sampler::{check_batch, NegativeSampler};

/// Metric name for the end-of-epoch margin loss.
pub const NCE_LOSS_METRIC: &str = "NCE Loss";

/// Metric name for a discriminator's end-of-epoch training accuracy.
pub fn discriminator_metric(attribute: &str) -> String {
    format!("Train {attribute} Disc")
}

/// Configuration for adversarial training.
#[derive(Config, Debug)]
pub struct FairTrainingConfig {
    /// Size of the user id space negatives are drawn from.
    pub num_users: usize,
    /// Size of the subreddit id space negatives are drawn from.
    pub num_subreddits: usize,
    /// Size of the relation id space.
    #[config(default = 1)]
    pub num_relations: usize,
    /// Margin of the ranking hinge.
    #[config(default = 1.0)]
    pub margin: f64,
    /// Corruption passes per positive batch.
    #[config(default = 1)]
    pub num_nce: usize,
    /// Weight of the fairness penalty in the encoder loss.
    #[config(default = 1.0)]
    pub gamma: f64,
    /// Discriminator update rounds per batch.
    #[config(default = 10)]
    pub d_steps: usize,
    /// Draw a random discriminator subset per batch from the mask set.
    #[config(default = false)]
    pub sample_mask: bool,
    /// Use the raw discriminator loss as the adversarial signal instead of
    /// the `active - score` form.
    #[config(default = false)]
    pub use_cross_entropy: bool,
    /// Skip the encoder update on adversarial steps and suppress epoch logging.
    #[config(default = false)]
    pub freeze_encoder: bool,
    /// Flag corrupted rows that collide with known triplets.
    #[config(default = false)]
    pub filter_false_negs: bool,
    /// Emit end-of-epoch metrics.
    #[config(default = true)]
    pub do_log: bool,
    /// Encoder learning rate.
    #[config(default = 1e-3)]
    pub lr: f64,
    /// Discriminator learning rate.
    #[config(default = 1e-3)]
    pub disc_lr: f64,
    #[config(default = 512)]
    pub batch_size: usize,
    #[config(default = 20)]
    pub embed_dim: usize,
    /// Hidden width of the discriminators.
    #[config(default = 64)]
    pub hidden_dim: usize,
    #[config(default = 10)]
    pub num_epochs: usize,
    #[config(default = 42)]
    pub seed: u64,
}

/// A discriminator paired with its optimizer.
pub struct Adversary<D, O> {
    pub discriminator: D,
    pub optimizer: O,
}

/// One sensitive attribute's place in the adversarial game.
///
/// A slot without an adversary is disabled: it never joins a step and is
/// skipped at logging time.
pub struct FairSlot<D, O> {
    pub attribute: SensitiveAttribute,
    /// Index into the encoder's filter bank.
    pub filter: usize,
    pub adversary: Option<Adversary<D, O>>,
}

impl<D, O> FairSlot<D, O> {
    pub fn new(attribute: SensitiveAttribute, filter: usize, discriminator: D, optimizer: O) -> Self {
        Self {
            attribute,
            filter,
            adversary: Some(Adversary {
                discriminator,
                optimizer,
            }),
        }
    }

    pub fn disabled(attribute: SensitiveAttribute, filter: usize) -> Self {
        Self {
            attribute,
            filter,
            adversary: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.adversary.is_some()
    }

    pub fn name(&self) -> &str {
        &self.attribute.name
    }

    pub fn discriminator(&self) -> Option<&D> {
        self.adversary.as_ref().map(|a| &a.discriminator)
    }
}

/// An enabled slot that survived the mask for the current batch.
struct ActiveSlot<'a, D, O> {
    index: usize,
    attribute: &'a SensitiveAttribute,
    filter: usize,
    adversary: &'a mut Adversary<D, O>,
}

/// What one batch did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
    /// Margin loss of the encoder update, `None` when the encoder is frozen
    /// and a discriminator was active.
    pub nce_loss: Option<f64>,
    /// Fairness penalty value; zero when no discriminator is active.
    pub fair_penalty: f64,
    /// Number of active discriminators (`constant`).
    pub active: usize,
    /// `(slot index, correct predictions)` for each active discriminator.
    pub correct: Vec<(usize, usize)>,
    /// Corrupted rows that collide with known triplets.
    pub false_negatives: usize,
    /// Discriminator optimizer steps taken.
    pub discriminator_steps: usize,
}

/// What one epoch did.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    pub batches: usize,
    /// Margin loss of the final batch.
    pub last_nce_loss: Option<f64>,
    /// `(attribute, accuracy %)` for every logged discriminator.
    pub accuracies: Vec<(String, f64)>,
    pub false_negatives: usize,
    pub elapsed_secs: f64,
}

/// Metadata saved alongside each checkpoint.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
pub struct CheckpointMeta {
    pub epoch: usize,
    pub batches: usize,
    pub last_nce_loss: Option<f64>,
    pub attributes: Vec<String>,
}

/// Owns the encoder, the fairness slots and their optimizers for a run.
pub struct AdversarialTrainer<B: AutodiffBackend, E, EO, D, DO> {
    config: FairTrainingConfig,
    encoder: E,
    encoder_optim: EO,
    slots: Vec<FairSlot<D, DO>>,
    masks: MaskSet,
    sampler: NegativeSampler,
    loss_fn: MarginRankingLoss,
    known: Option<KnownTriplets>,
    tally: AccuracyTally,
    device: B::Device,
}

impl<B, E, EO, D, DO> AdversarialTrainer<B, E, EO, D, DO>
where
    B: AutodiffBackend,
    E: KgEncoder<B> + AutodiffModule<B>,
    E::InnerModule: KgEncoder<B::InnerBackend>,
    EO: Optimizer<E, B>,
    D: Discriminator<B> + AutodiffModule<B>,
    D::InnerModule: Discriminator<B::InnerBackend>,
    DO: Optimizer<D, B>,
{
    /// Validate the slot layout against the encoder and mask set.
    pub fn new(
        config: FairTrainingConfig,
        encoder: E,
        encoder_optim: EO,
        slots: Vec<FairSlot<D, DO>>,
        masks: MaskSet,
        device: B::Device,
    ) -> Result<Self, TrainError> {
        if masks.width() != slots.len() {
            return Err(TrainError::MaskLength {
                expected: slots.len(),
                got: masks.width(),
            });
        }
        if config.sample_mask && masks.is_empty() {
            return Err(TrainError::EmptyMaskSet);
        }
        if config.num_nce == 0 || config.num_users == 0 || config.num_subreddits == 0 {
            return Err(TrainError::ShapeMismatch(format!(
                "num_nce, num_users and num_subreddits must be positive, got {}, {}, {}",
                config.num_nce, config.num_users, config.num_subreddits
            )));
        }
        if let Some(slot) = slots.iter().find(|s| s.filter >= encoder.num_filters()) {
            return Err(TrainError::ShapeMismatch(format!(
                "attribute '{}' uses filter {} but the encoder has {}",
                slot.name(),
                slot.filter,
                encoder.num_filters()
            )));
        }

        let sampler = NegativeSampler::new(config.num_users, config.num_subreddits);
        let loss_fn = MarginRankingLoss::new(config.margin, config.num_nce);
        let tally = AccuracyTally::new(slots.len());

        tracing::info!(
            slots = slots.len(),
            enabled = slots.iter().filter(|s| s.is_enabled()).count(),
            masks = masks.len(),
            sample_mask = config.sample_mask,
            num_nce = config.num_nce,
            gamma = config.gamma,
            d_steps = config.d_steps,
            "Adversarial trainer initialized"
        );

        Ok(Self {
            config,
            encoder,
            encoder_optim,
            slots,
            masks,
            sampler,
            loss_fn,
            known: None,
            tally,
            device,
        })
    }

    /// Known-true triplets used for false-negative flagging.
    pub fn with_known_triplets(mut self, known: KnownTriplets) -> Self {
        self.known = Some(known);
        self
    }

    pub fn config(&self) -> &FairTrainingConfig {
        &self.config
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    pub fn slots(&self) -> &[FairSlot<D, DO>] {
        &self.slots
    }

    pub fn tally(&self) -> &AccuracyTally {
        &self.tally
    }

    /// Hand back the trained encoder and slots.
    pub fn into_parts(self) -> (E, Vec<FairSlot<D, DO>>) {
        (self.encoder, self.slots)
    }

    fn check_entities(&self, batch: &[Triplet]) -> Result<(), TrainError> {
        let in_range = |id: i64, size: usize| id >= 0 && (id as usize) < size;
        for t in batch {
            if !in_range(t.user, self.config.num_users) {
                return Err(TrainError::EntityOutOfRange {
                    kind: "user",
                    id: t.user,
                    size: self.config.num_users,
                });
            }
            if !in_range(t.subreddit, self.config.num_subreddits) {
                return Err(TrainError::EntityOutOfRange {
                    kind: "subreddit",
                    id: t.subreddit,
                    size: self.config.num_subreddits,
                });
            }
            if !in_range(t.relation, self.config.num_relations) {
                return Err(TrainError::EntityOutOfRange {
                    kind: "relation",
                    id: t.relation,
                    size: self.config.num_relations,
                });
            }
        }
        Ok(())
    }

    /// Train on one positive batch.
    pub fn train_step(&mut self, batch: &[Triplet], rng: &mut impl Rng) -> Result<StepReport, TrainError> {
        check_batch(batch.len())?;
        self.check_entities(batch)?;
        let b = batch.len();

        // Select discriminators
        let mask = if self.config.sample_mask {
            Some(self.masks.choose(rng)?.to_vec())
        } else {
            None
        };

        // Sample negatives
        let known = if self.config.filter_false_negs {
            self.known.as_ref()
        } else {
            None
        };
        let negatives = self.sampler.sample(batch, self.config.num_nce, known, rng)?;
        let n_neg = negatives.len();
        let false_negatives = negatives.num_false_negatives();
        if false_negatives > 0 {
            tracing::debug!(false_negatives, n_neg, "Corrupted rows collide with known triplets");
        }
        let rows: Vec<Triplet> = batch.iter().chain(&negatives.triplets).copied().collect();

        let selected = match &mask {
            Some(m) => compress(self.slots.iter_mut().enumerate(), m),
            None => self.slots.iter_mut().enumerate().collect(),
        };
        let mut active: Vec<ActiveSlot<'_, D, DO>> = selected
            .into_iter()
            .filter_map(|(index, slot)| {
                let FairSlot {
                    attribute,
                    filter,
                    adversary,
                } = slot;
                adversary.as_mut().map(|adversary| ActiveSlot {
                    index,
                    attribute: &*attribute,
                    filter: *filter,
                    adversary,
                })
            })
            .collect();
        let constant = active.len();

        let mut report = StepReport {
            active: constant,
            false_negatives,
            ..StepReport::default()
        };
        let input = triplets_to_tensor::<B>(&rows, &self.device);

        if constant == 0 {
            // Margin loss only. The frozen flag only gates the adversarial branch.
            let energies = self.encoder.energies(input);
            let pos_energy = energies.clone().slice([0..b]);
            let neg_energy = energies.slice([b..b + n_neg]);
            let (nce, _) = self.loss_fn.forward(pos_energy, neg_energy, None)?;
            report.nce_loss = Some(tensor_to_f64(nce.clone()));

            let grads = GradientsParams::from_grads(nce.backward(), &self.encoder);
            self.encoder = self
                .encoder_optim
                .step(self.config.lr, self.encoder.clone(), grads);
            return Ok(report);
        }

        let users = batch.iter().map(|t| t.user);
        let labels_host: Vec<Vec<i64>> = active
            .iter()
            .map(|slot| slot.attribute.labels_for(users.clone()))
            .collect::<Result<_, _>>()?;
        let labels: Vec<Tensor<B, 1, Int>> = labels_host
            .iter()
            .map(|l| labels_to_tensor::<B>(l, &self.device))
            .collect();
        let filters: Vec<usize> = active.iter().map(|slot| slot.filter).collect();

        // Discriminator-mode forward, positive rows first
        let out = self.encoder.encode_filtered(input, &filters);
        let [_, dim] = out.lhs.dims();
        let pos_lhs = out.lhs.slice([0..b, 0..dim]);
        let pos_lhs_detached = pos_lhs.clone().detach();

        let mut penalty = Tensor::<B, 1>::zeros([1], &self.device);
        for (slot, labels) in active.iter().zip(&labels) {
            penalty = penalty
                + slot
                    .adversary
                    .discriminator
                    .score(pos_lhs.clone(), labels.clone());
        }
        let fair_penalty = if self.config.use_cross_entropy {
            penalty.neg()
        } else {
            penalty.neg().add_scalar(constant as f64)
        };
        report.fair_penalty = tensor_to_f64(fair_penalty.clone());

        // Encoder update
        if !self.config.freeze_encoder {
            let pos_energy = out.energies.clone().slice([0..b]);
            let neg_energy = out.energies.slice([b..b + n_neg]);
            let (nce, _) = self.loss_fn.forward(pos_energy, neg_energy, None)?;
            report.nce_loss = Some(tensor_to_f64(nce.clone()));

            let loss = nce + fair_penalty.mul_scalar(self.config.gamma);
            let grads = GradientsParams::from_grads(loss.backward(), &self.encoder);
            self.encoder = self
                .encoder_optim
                .step(self.config.lr, self.encoder.clone(), grads);
        }

        // Discriminator updates on the detached embedding
        for _ in 0..self.config.d_steps {
            for (slot, labels) in active.iter_mut().zip(&labels) {
                let adversary = &mut *slot.adversary;
                let score = adversary
                    .discriminator
                    .score(pos_lhs_detached.clone(), labels.clone());
                let loss = if self.config.use_cross_entropy {
                    score
                } else {
                    // -(1 - score)
                    score.sub_scalar(1.0)
                };
                let grads = GradientsParams::from_grads(loss.backward(), &adversary.discriminator);
                adversary.discriminator = adversary.optimizer.step(
                    self.config.disc_lr,
                    adversary.discriminator.clone(),
                    grads,
                );
                report.discriminator_steps += 1;
            }
        }

        // Accuracy bookkeeping, no gradients
        let encoder = self.encoder.valid();
        let input = triplets_to_tensor::<B::InnerBackend>(&rows, &self.device);
        let out = encoder.encode_filtered(input, &filters);
        let pos_lhs = out.lhs.slice([0..b, 0..dim]);
        for (slot, labels) in active.iter().zip(&labels_host) {
            let discriminator = slot.adversary.discriminator.valid();
            let prediction = discriminator.predict(
                pos_lhs.clone(),
                labels_to_tensor::<B::InnerBackend>(labels, &self.device),
            );
            report.correct.push((slot.index, prediction.num_correct()));
        }

        Ok(report)
    }

    /// Train one pass over `loader` and log end-of-epoch metrics.
    ///
    /// `epoch` is only used as the metric step.
    pub fn train_epoch(
        &mut self,
        loader: &TripletLoader,
        epoch: usize,
        logger: &mut dyn MetricLogger,
        rng: &mut impl Rng,
    ) -> Result<EpochReport, TrainError> {
        let start = Instant::now();
        let batches = loader.epoch(rng);
        let mut last_nce_loss = None;
        let mut false_negatives = 0;

        for (idx, batch) in batches.iter().enumerate() {
            let report = self.train_step(batch, rng)?;
            for &(slot, correct) in &report.correct {
                self.tally.add(slot, correct);
            }
            false_negatives += report.false_negatives;
            last_nce_loss = report.nce_loss;
            tracing::debug!(
                epoch,
                batch = idx,
                active = report.active,
                nce = ?report.nce_loss,
                penalty = report.fair_penalty,
                "Batch done"
            );
        }

        // A frozen run keeps accumulating correct counts without logging them
        let mut accuracies = Vec::new();
        if self.config.do_log && !self.config.freeze_encoder {
            if let Some(loss) = last_nce_loss {
                logger.log_metric(NCE_LOSS_METRIC, loss, epoch);
            }
            let dataset_size = loader.dataset_len();
            for (i, slot) in self.slots.iter().enumerate() {
                if !slot.is_enabled() {
                    continue;
                }
                let acc = self.tally.take_accuracy(i, dataset_size);
                logger.log_metric(&discriminator_metric(slot.name()), acc, epoch);
                accuracies.push((slot.name().to_string(), acc));
            }
        }

        let elapsed_secs = start.elapsed().as_secs_f64();
        let acc_display: Vec<String> = accuracies
            .iter()
            .map(|(name, acc)| format!("{name}={acc:.1}%"))
            .collect();
        tracing::info!(
            epoch,
            batches = batches.len(),
            nce = ?last_nce_loss,
            false_negatives,
            elapsed_secs = format!("{elapsed_secs:.1}"),
            "Epoch finished {}",
            acc_display.join(" ")
        );
        if batches.is_empty() {
            tracing::warn!(
                epoch,
                dataset = loader.dataset_len(),
                batch_size = loader.batch_size(),
                "Epoch had no full batches"
            );
        }

        Ok(EpochReport {
            epoch,
            batches: batches.len(),
            last_nce_loss,
            accuracies,
            false_negatives,
            elapsed_secs,
        })
    }

    /// Save the encoder, every enabled discriminator and `meta.json` to `dir`.
    pub fn save_checkpoint(&self, dir: &Path, meta: &CheckpointMeta) -> anyhow::Result<()> {
        std::fs::create_dir_all(dir)?;
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();

        let encoder_path = dir.join("encoder");
        self.encoder
            .clone()
            .save_file(&encoder_path, &recorder)
            .map_err(|e| anyhow::anyhow!("Failed to save encoder to {}: {e}", dir.display()))?;

        for slot in &self.slots {
            if let Some(discriminator) = slot.discriminator() {
                let path = dir.join(format!("disc_{}", slot.name()));
                discriminator
                    .clone()
                    .save_file(&path, &recorder)
                    .map_err(|e| {
                        anyhow::anyhow!("Failed to save discriminator '{}': {e}", slot.name())
                    })?;
            }
        }

        let meta_path = dir.join("meta.json");
        serde_json::to_writer_pretty(std::fs::File::create(&meta_path)?, meta)?;

        tracing::info!(dir = %dir.display(), epoch = meta.epoch, "Checkpoint saved");
        Ok(())
    }
}

/// Load a [`TransEncoder`] saved by [`AdversarialTrainer::save_checkpoint`].
///
/// Creates a fresh model from config, then loads saved weights on top.
pub fn load_encoder<B: Backend>(
    path: &Path,
    config: &TransEncoderConfig,
    device: &B::Device,
) -> anyhow::Result<TransEncoder<B>> {
    let model = config
        .init::<B>(device)
        .load_file(
            path,
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
            device,
        )
        .map_err(|e| anyhow::anyhow!("Failed to load encoder from {}: {e}", path.display()))?;
    Ok(model)
}

/// Read the `meta.json` written next to a checkpoint.
pub fn load_checkpoint_meta(dir: &Path) -> anyhow::Result<CheckpointMeta> {
    let meta_path = dir.join("meta.json");
    let meta = serde_json::from_reader(
        std::fs::File::open(&meta_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {e}", meta_path.display()))?,
    )
    .map_err(|e| anyhow::anyhow!("Failed to parse {}: {e}", meta_path.display()))?;
    Ok(meta)
}
