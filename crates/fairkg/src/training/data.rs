//! Triplet data pipeline for adversarial KG training.
//!
//! Loads `(user, subreddit, relation)` interaction triplets from text files,
//! per-user sensitive attribute labels from JSON, and serves shuffled batches
//! per epoch. Everything here is host-side; tensors are built in
//! [`crate::model::bridge`].

use std::collections::HashSet;
use std::io::BufRead;
use std::path::Path;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::TrainError;

/// Size of the canonical byte form of a triplet.
pub const TRIPLET_BYTES: usize = 24;

/// A single user → subreddit interaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triplet {
    pub user: i64,
    pub subreddit: i64,
    /// Interaction type. Copied unchanged by corruption.
    pub relation: i64,
}

impl Triplet {
    pub fn new(user: i64, subreddit: i64, relation: i64) -> Self {
        Self {
            user,
            subreddit,
            relation,
        }
    }

    /// Canonical serialized form: the three fields as little-endian `i64`.
    pub fn to_bytes(&self) -> [u8; TRIPLET_BYTES] {
        let mut out = [0u8; TRIPLET_BYTES];
        out[0..8].copy_from_slice(&self.user.to_le_bytes());
        out[8..16].copy_from_slice(&self.subreddit.to_le_bytes());
        out[16..24].copy_from_slice(&self.relation.to_le_bytes());
        out
    }
}

/// Set of known-true triplets, keyed by canonical bytes.
///
/// Used to flag corrupted rows that accidentally reproduce a real interaction.
#[derive(Debug, Default, Clone)]
pub struct KnownTriplets {
    hashes: HashSet<[u8; TRIPLET_BYTES]>,
}

impl KnownTriplets {
    pub fn from_triplets<'a>(triplets: impl IntoIterator<Item = &'a Triplet>) -> Self {
        Self {
            hashes: triplets.into_iter().map(Triplet::to_bytes).collect(),
        }
    }

    pub fn contains(&self, triplet: &Triplet) -> bool {
        self.hashes.contains(&triplet.to_bytes())
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

/// Summary statistics for a triplet dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetSummary {
    pub triplets: usize,
    pub num_users: usize,
    pub num_subreddits: usize,
    pub num_relations: usize,
    pub distinct_users: usize,
    pub distinct_subreddits: usize,
}

/// In-memory triplet dataset.
#[derive(Debug, Clone)]
pub struct TripletDataset {
    triplets: Vec<Triplet>,
}

impl TripletDataset {
    pub fn from_triplets(triplets: Vec<Triplet>) -> Self {
        Self { triplets }
    }

    /// Load triplets from a whitespace-separated text file.
    ///
    /// Each non-empty line is `user subreddit [relation]`; a missing relation
    /// defaults to 0. Lines starting with `#` are skipped.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| anyhow::anyhow!("Failed to open triplets file {}: {e}", path.display()))?;
        let reader = std::io::BufReader::new(file);

        let mut triplets = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let triplet = parse_triplet(line).map_err(|e| {
                anyhow::anyhow!("{}:{}: {e}", path.display(), lineno + 1)
            })?;
            triplets.push(triplet);
        }

        if triplets.is_empty() {
            anyhow::bail!("No triplets found in {}", path.display());
        }

        let dataset = Self { triplets };
        let summary = dataset.summary();
        tracing::info!(
            path = %path.display(),
            triplets = summary.triplets,
            users = summary.num_users,
            subreddits = summary.num_subreddits,
            "Loaded triplet dataset"
        );
        Ok(dataset)
    }

    pub fn triplets(&self) -> &[Triplet] {
        &self.triplets
    }

    pub fn len(&self) -> usize {
        self.triplets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triplets.is_empty()
    }

    /// Size of the user id space (max id + 1).
    pub fn num_users(&self) -> usize {
        id_space(self.triplets.iter().map(|t| t.user))
    }

    /// Size of the subreddit id space (max id + 1).
    pub fn num_subreddits(&self) -> usize {
        id_space(self.triplets.iter().map(|t| t.subreddit))
    }

    /// Size of the relation id space (max id + 1).
    pub fn num_relations(&self) -> usize {
        id_space(self.triplets.iter().map(|t| t.relation)).max(1)
    }

    pub fn summary(&self) -> DatasetSummary {
        let distinct_users: HashSet<i64> = self.triplets.iter().map(|t| t.user).collect();
        let distinct_subreddits: HashSet<i64> =
            self.triplets.iter().map(|t| t.subreddit).collect();
        DatasetSummary {
            triplets: self.triplets.len(),
            num_users: self.num_users(),
            num_subreddits: self.num_subreddits(),
            num_relations: self.num_relations(),
            distinct_users: distinct_users.len(),
            distinct_subreddits: distinct_subreddits.len(),
        }
    }

    pub fn known_triplets(&self) -> KnownTriplets {
        KnownTriplets::from_triplets(&self.triplets)
    }
}

fn id_space(ids: impl Iterator<Item = i64>) -> usize {
    ids.max().map(|m| (m.max(-1) + 1) as usize).unwrap_or(0)
}

fn parse_triplet(line: &str) -> anyhow::Result<Triplet> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 2 && fields.len() != 3 {
        anyhow::bail!("expected 2 or 3 columns, found {}", fields.len());
    }
    let parse = |s: &str, what: &str| -> anyhow::Result<i64> {
        let v: i64 = s
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {what} id '{s}': {e}"))?;
        if v < 0 {
            anyhow::bail!("negative {what} id {v}");
        }
        Ok(v)
    };
    let user = parse(fields[0], "user")?;
    let subreddit = parse(fields[1], "subreddit")?;
    let relation = match fields.get(2) {
        Some(s) => parse(s, "relation")?,
        None => 0,
    };
    Ok(Triplet::new(user, subreddit, relation))
}

/// Serves a dataset as a sequence of batches, reshuffled every epoch.
///
/// Restartable: each call to [`TripletLoader::epoch`] yields a fresh pass.
pub struct TripletLoader {
    dataset: TripletDataset,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
}

impl TripletLoader {
    pub fn new(dataset: TripletDataset, batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch_size must be > 0");
        Self {
            dataset,
            batch_size,
            shuffle: true,
            drop_last: true,
        }
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Whether a trailing partial batch is discarded.
    pub fn with_drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    pub fn dataset(&self) -> &TripletDataset {
        &self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of rows in the underlying dataset.
    pub fn dataset_len(&self) -> usize {
        self.dataset.len()
    }

    pub fn num_batches(&self) -> usize {
        let n = self.dataset.len();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    /// Produce the batches for one epoch.
    pub fn epoch(&self, rng: &mut impl Rng) -> Vec<Vec<Triplet>> {
        let mut rows = self.dataset.triplets.clone();
        if self.shuffle {
            rows.shuffle(rng);
        }
        rows.chunks(self.batch_size)
            .filter(|chunk| !self.drop_last || chunk.len() == self.batch_size)
            .map(<[Triplet]>::to_vec)
            .collect()
    }
}

/// A sensitive attribute with one class label per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensitiveAttribute {
    /// Attribute name used as the metric key (e.g. "gender").
    pub name: String,
    /// Number of classes the discriminator predicts.
    pub num_classes: usize,
    /// Class label per user id; index = user id.
    pub labels: Vec<i64>,
}

impl SensitiveAttribute {
    /// Load an attribute from JSON: `{"name", "num_classes", "labels"}`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| anyhow::anyhow!("Failed to open attribute file {}: {e}", path.display()))?;
        let attr: SensitiveAttribute = serde_json::from_reader(std::io::BufReader::new(file))
            .map_err(|e| anyhow::anyhow!("Failed to parse attribute file {}: {e}", path.display()))?;
        attr.validate()?;
        tracing::info!(
            name = %attr.name,
            classes = attr.num_classes,
            users = attr.labels.len(),
            "Loaded sensitive attribute"
        );
        Ok(attr)
    }

    /// Check that every label lies in `[0, num_classes)`.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.num_classes < 2 {
            anyhow::bail!(
                "attribute '{}' needs at least 2 classes, got {}",
                self.name,
                self.num_classes
            );
        }
        if let Some((user, label)) = self
            .labels
            .iter()
            .enumerate()
            .find(|(_, l)| **l < 0 || **l as usize >= self.num_classes)
        {
            anyhow::bail!(
                "attribute '{}': user {user} has label {label} outside [0, {})",
                self.name,
                self.num_classes
            );
        }
        Ok(())
    }

    /// Look up the label of every user in a batch.
    pub fn labels_for(&self, users: impl IntoIterator<Item = i64>) -> Result<Vec<i64>, TrainError> {
        users
            .into_iter()
            .map(|user| {
                usize::try_from(user)
                    .ok()
                    .and_then(|u| self.labels.get(u).copied())
                    .ok_or_else(|| TrainError::UnknownUser {
                        attribute: self.name.clone(),
                        user,
                        num_users: self.labels.len(),
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn make_dataset(n: i64) -> TripletDataset {
        TripletDataset::from_triplets((0..n).map(|i| Triplet::new(i % 5, i % 7, 0)).collect())
    }

    #[test]
    fn test_canonical_bytes() {
        let t = Triplet::new(1, 258, -1);
        let bytes = t.to_bytes();
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[8..10], &[2, 1]);
        assert!(bytes[16..24].iter().all(|&b| b == 0xff));
    }

    #[test]
    fn test_known_triplets_membership() {
        let rows = vec![Triplet::new(0, 1, 0), Triplet::new(2, 3, 0)];
        let known = KnownTriplets::from_triplets(&rows);
        assert_eq!(known.len(), 2);
        assert!(known.contains(&Triplet::new(2, 3, 0)));
        assert!(!known.contains(&Triplet::new(2, 3, 1)));
        assert!(!known.contains(&Triplet::new(3, 2, 0)));
    }

    #[test]
    fn test_parse_triplet_columns() {
        assert_eq!(parse_triplet("4 9").unwrap(), Triplet::new(4, 9, 0));
        assert_eq!(parse_triplet("4\t9\t2").unwrap(), Triplet::new(4, 9, 2));
        assert!(parse_triplet("4").is_err());
        assert!(parse_triplet("4 x").is_err());
        assert!(parse_triplet("-1 2").is_err());
    }

    #[test]
    fn test_id_spaces() {
        let ds = make_dataset(20);
        assert_eq!(ds.num_users(), 5);
        assert_eq!(ds.num_subreddits(), 7);
        assert_eq!(ds.num_relations(), 1);
        let summary = ds.summary();
        assert_eq!(summary.triplets, 20);
        assert_eq!(summary.distinct_users, 5);
    }

    #[test]
    fn test_loader_drop_last() {
        let loader = TripletLoader::new(make_dataset(10), 4);
        let mut rng = StdRng::seed_from_u64(7);
        let batches = loader.epoch(&mut rng);
        assert_eq!(batches.len(), 2);
        assert_eq!(loader.num_batches(), 2);
        assert!(batches.iter().all(|b| b.len() == 4));
    }

    #[test]
    fn test_loader_keep_last() {
        let loader = TripletLoader::new(make_dataset(10), 4)
            .with_drop_last(false)
            .with_shuffle(false);
        let mut rng = StdRng::seed_from_u64(7);
        let batches = loader.epoch(&mut rng);
        assert_eq!(batches.len(), 3);
        assert_eq!(loader.num_batches(), 3);
        assert_eq!(batches[2].len(), 2);
        assert_eq!(batches[0][0], Triplet::new(0, 0, 0));
    }

    #[test]
    fn test_loader_shuffle_is_permutation() {
        let loader = TripletLoader::new(make_dataset(12), 12);
        let mut rng = StdRng::seed_from_u64(3);
        let mut rows = loader.epoch(&mut rng).remove(0);
        let mut expected = loader.dataset().triplets().to_vec();
        rows.sort_by_key(|t| (t.user, t.subreddit));
        expected.sort_by_key(|t| (t.user, t.subreddit));
        assert_eq!(rows, expected);
    }

    #[test]
    fn test_labels_for() {
        let attr = SensitiveAttribute {
            name: "gender".into(),
            num_classes: 2,
            labels: vec![0, 1, 1],
        };
        assert_eq!(attr.labels_for([2, 0, 1]).unwrap(), vec![1, 0, 1]);
        match attr.labels_for([3]) {
            Err(TrainError::UnknownUser { user, .. }) => assert_eq!(user, 3),
            other => panic!("expected UnknownUser, got {other:?}"),
        }
    }

    #[test]
    fn test_attribute_validation() {
        let attr = SensitiveAttribute {
            name: "age".into(),
            num_classes: 2,
            labels: vec![0, 2],
        };
        assert!(attr.validate().is_err());
    }
}
