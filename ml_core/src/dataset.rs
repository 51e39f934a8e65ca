use ndarray::{Array1, ArrayView1};
use ndarray_rand::RandomExt;
use rand::Rng;
use rand_distr::Normal;

/// Sample-level transform applied lazily at read time.
pub type Transform = fn(ArrayView1<f32>) -> Array1<f32>;

/// The fixed, ordered slice of data owned by one simulated client.
///
/// A partition may be empty; downstream consumers must treat a zero sample
/// count as "contributes nothing" rather than dividing by it.
#[derive(Clone)]
pub struct Partition {
    xs: Vec<Array1<f32>>,
    ys: Vec<usize>,
    transform: Option<Transform>,
}

impl Partition {
    /// Creates a partition from parallel sample/label buffers.
    ///
    /// # Panics
    /// Panics if `xs` and `ys` differ in length.
    pub fn new(xs: Vec<Array1<f32>>, ys: Vec<usize>) -> Self {
        assert_eq!(xs.len(), ys.len(), "samples and labels must have same length");
        Self {
            xs,
            ys,
            transform: None,
        }
    }

    /// Attaches a read-time transform.
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ys.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ys.is_empty()
    }

    /// Returns the sample at `idx`, transformed if a transform is attached.
    ///
    /// # Panics
    /// Panics if `idx` is out of bounds.
    pub fn sample(&self, idx: usize) -> (Array1<f32>, usize) {
        let raw = &self.xs[idx];
        let x = match self.transform {
            Some(t) => t(raw.view()),
            None => raw.clone(),
        };
        (x, self.ys[idx])
    }

    /// Deterministic class-conditional Gaussian data: each label gets a
    /// fixed center along one input axis, samples are center plus noise.
    pub fn synthetic(
        num_samples: usize,
        input_dim: usize,
        num_classes: usize,
        rng: &mut impl Rng,
    ) -> Self {
        assert!(input_dim > 0, "input_dim must be positive");
        assert!(num_classes > 0, "num_classes must be positive");

        let noise = Normal::new(0.0_f32, 0.35).expect("valid sigma");
        let mut xs = Vec::with_capacity(num_samples);
        let mut ys = Vec::with_capacity(num_samples);

        for _ in 0..num_samples {
            let y = rng.random_range(0..num_classes);
            let mut x = Array1::random_using(input_dim, noise, rng);
            x[y % input_dim] += 2.0;
            xs.push(x);
            ys.push(y);
        }

        Self::new(xs, ys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn indexed_access_returns_pairs() {
        let p = Partition::new(vec![array![1.0, 2.0], array![3.0, 4.0]], vec![0, 1]);
        assert_eq!(p.len(), 2);

        let (x, y) = p.sample(1);
        assert_eq!(x, array![3.0, 4.0]);
        assert_eq!(y, 1);
    }

    #[test]
    fn transform_applies_at_read_time() {
        fn double(x: ArrayView1<f32>) -> Array1<f32> {
            x.mapv(|v| v * 2.0)
        }

        let p = Partition::new(vec![array![1.0, -1.0]], vec![0]).with_transform(double);
        let (x, _) = p.sample(0);
        assert_eq!(x, array![2.0, -2.0]);
    }

    #[test]
    fn synthetic_is_deterministic_for_a_seed() {
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);

        let pa = Partition::synthetic(5, 3, 2, &mut a);
        let pb = Partition::synthetic(5, 3, 2, &mut b);

        assert_eq!(pa.len(), 5);
        for i in 0..5 {
            let (xa, ya) = pa.sample(i);
            let (xb, yb) = pb.sample(i);
            assert_eq!(xa, xb);
            assert_eq!(ya, yb);
        }
    }

    #[test]
    fn empty_partition_is_allowed() {
        let p = Partition::new(vec![], vec![]);
        assert!(p.is_empty());
        assert_eq!(p.len(), 0);
    }
}
