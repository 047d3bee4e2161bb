/// A restartable source of batches consumed by an `Engine`.
///
/// The engine calls `reset` before every fresh pass over the data and then pulls batches with
/// `next_batch` until it gets `None` or the epoch is over.
pub trait DataSource {
    type Batch;

    /// The amount of batches in a full pass, if known up front.
    fn len(&self) -> Option<usize>;

    /// Returns the next batch of the current pass, or `None` if exhausted.
    fn next_batch(&mut self) -> Option<Self::Batch>;

    /// Restarts the pass from the beginning.
    fn reset(&mut self);

    /// Reseeds any randomness the source uses to order its batches.
    fn reseed(&mut self, _seed: u64) {}
}

/// An in-memory list of batches.
#[derive(Debug, Clone)]
pub struct Batches<B> {
    batches: Vec<B>,
    cursor: usize,
}

impl<B> Batches<B> {
    pub fn new(batches: Vec<B>) -> Self {
        Self { batches, cursor: 0 }
    }
}

impl<B: Clone> DataSource for Batches<B> {
    type Batch = B;

    fn len(&self) -> Option<usize> {
        Some(self.batches.len())
    }

    fn next_batch(&mut self) -> Option<B> {
        let batch = self.batches.get(self.cursor)?.clone();
        self.cursor += 1;
        Some(batch)
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }
}

impl<B: Clone> From<Vec<B>> for Batches<B> {
    fn from(batches: Vec<B>) -> Self {
        Self::new(batches)
    }
}

/// A source of unknown length built from an iterator factory.
///
/// The factory is called again on every `reset`.
pub struct Stream<F, I> {
    factory: F,
    iter: Option<I>,
}

impl<F, I> Stream<F, I>
where
    F: FnMut() -> I,
    I: Iterator,
{
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            iter: None,
        }
    }
}

impl<F, I> DataSource for Stream<F, I>
where
    F: FnMut() -> I,
    I: Iterator,
{
    type Batch = I::Item;

    fn len(&self) -> Option<usize> {
        None
    }

    fn next_batch(&mut self) -> Option<I::Item> {
        self.iter.as_mut()?.next()
    }

    fn reset(&mut self) {
        self.iter = Some((self.factory)());
    }
}
