use std::num::NonZeroUsize;

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use super::InMemoryDataset;
use crate::{engine::DataSource, training::Batch};

/// Yields the rows of a dataset in batches, optionally reshuffled on every reset.
#[derive(Debug, Clone)]
pub struct DataLoader {
    dataset: InMemoryDataset,
    batch_size: NonZeroUsize,
    order: Vec<usize>,
    rng: Option<StdRng>,
    cursor: usize,
}

impl DataLoader {
    /// Creates a loader going through the dataset in order.
    pub fn new(dataset: InMemoryDataset, batch_size: NonZeroUsize) -> Self {
        let order = (0..dataset.len()).collect();

        Self {
            dataset,
            batch_size,
            order,
            rng: None,
            cursor: 0,
        }
    }

    /// Shuffles the rows on every reset, with a generator seeded by `seed`.
    pub fn shuffled(mut self, seed: u64) -> Self {
        self.rng = Some(StdRng::seed_from_u64(seed));
        self.shuffle();
        self
    }

    pub fn dataset(&self) -> &InMemoryDataset {
        &self.dataset
    }

    pub fn batch_size(&self) -> NonZeroUsize {
        self.batch_size
    }

    fn shuffle(&mut self) {
        if let Some(rng) = self.rng.as_mut() {
            self.order.shuffle(rng);
        }
    }
}

impl DataSource for DataLoader {
    type Batch = Batch;

    fn len(&self) -> Option<usize> {
        Some(self.dataset.len().div_ceil(self.batch_size.get()))
    }

    /// Returns the next batch, or None if exhausted. The last batch may be smaller.
    fn next_batch(&mut self) -> Option<Batch> {
        if self.cursor >= self.order.len() {
            return None;
        }

        let end = (self.cursor + self.batch_size.get()).min(self.order.len());
        let batch = self.dataset.select(&self.order[self.cursor..end]);

        self.cursor = end;
        Some(batch)
    }

    fn reset(&mut self) {
        self.cursor = 0;
        self.shuffle();
    }

    /// Replaces the shuffling generator, so the order of the next pass only depends on `seed`.
    fn reseed(&mut self, seed: u64) {
        if self.rng.is_some() {
            self.rng = Some(StdRng::seed_from_u64(seed));
            self.order = (0..self.dataset.len()).collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;

    fn dataset(n: usize) -> InMemoryDataset {
        let x = Array2::from_shape_fn((n, 1), |(i, _)| i as f32);
        let y = Array2::from_shape_fn((n, 1), |(i, _)| i as f32 + 100.);
        InMemoryDataset::new(x, y).unwrap()
    }

    fn first_column(batch: &Batch) -> Vec<f32> {
        batch.0.column(0).to_vec()
    }

    #[test]
    fn dataloader_batches_respect_batch_size() {
        let mut dl = DataLoader::new(dataset(5), NonZeroUsize::new(2).unwrap());
        assert_eq!(dl.len(), Some(3));

        let b1 = dl.next_batch().unwrap();
        assert_eq!(first_column(&b1), [0., 1.]);
        assert_eq!(b1.1.column(0).to_vec(), [100., 101.]);

        dl.next_batch().unwrap();
        let b3 = dl.next_batch().unwrap();
        assert_eq!(first_column(&b3), [4.]);

        assert!(dl.next_batch().is_none());

        dl.reset();
        assert_eq!(first_column(&dl.next_batch().unwrap()), [0., 1.]);
    }

    #[test]
    fn shuffled_loader_covers_every_row() {
        let mut dl = DataLoader::new(dataset(10), NonZeroUsize::new(3).unwrap()).shuffled(7);

        let mut seen: Vec<f32> = std::iter::from_fn(|| dl.next_batch())
            .flat_map(|b| first_column(&b))
            .collect();
        seen.sort_by(f32::total_cmp);

        assert_eq!(seen, (0..10).map(|i| i as f32).collect::<Vec<_>>());
    }

    #[test]
    fn reseeding_reproduces_the_order() {
        let mut dl = DataLoader::new(dataset(10), NonZeroUsize::new(10).unwrap()).shuffled(1);

        dl.reseed(42);
        dl.reset();
        let first = dl.next_batch().unwrap();

        dl.reseed(42);
        dl.reset();
        let second = dl.next_batch().unwrap();

        assert_eq!(first, second);
    }
}
