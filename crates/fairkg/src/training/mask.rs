//! Selection of the fairness discriminators that take part in a step.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::TrainError;

/// Keep the items whose mask bit is set, preserving order.
///
/// `compress("ABCDEF", [1,0,1,0,1,1])` keeps `A C E F`. Extra items or mask
/// bits beyond the shorter of the two are dropped.
pub fn compress<I: IntoIterator>(items: I, mask: &[bool]) -> Vec<I::Item> {
    items
        .into_iter()
        .zip(mask)
        .filter_map(|(item, &keep)| keep.then_some(item))
        .collect()
}

/// Precomputed allowed combinations of active discriminators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskSet {
    masks: Vec<Vec<bool>>,
    width: usize,
}

impl MaskSet {
    /// Build a mask set where every vector has one bit per fairness slot.
    pub fn new(masks: Vec<Vec<bool>>, width: usize) -> Result<Self, TrainError> {
        if let Some(bad) = masks.iter().find(|m| m.len() != width) {
            return Err(TrainError::MaskLength {
                expected: width,
                got: bad.len(),
            });
        }
        Ok(Self { masks, width })
    }

    /// Every binary vector of length `width`, all-zeros first.
    pub fn all_combinations(width: usize) -> Self {
        assert!(width < usize::BITS as usize, "too many slots to enumerate");
        let masks = (0..1usize << width)
            .map(|bits| (0..width).map(|i| (bits >> i) & 1 == 1).collect())
            .collect();
        Self { masks, width }
    }

    /// A set holding only the all-ones vector.
    pub fn all_active(width: usize) -> Self {
        Self {
            masks: vec![vec![true; width]],
            width,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    pub fn masks(&self) -> &[Vec<bool>] {
        &self.masks
    }

    /// Draw one mask uniformly.
    pub fn choose(&self, rng: &mut impl Rng) -> Result<&[bool], TrainError> {
        self.masks
            .choose(rng)
            .map(Vec::as_slice)
            .ok_or(TrainError::EmptyMaskSet)
    }
}
