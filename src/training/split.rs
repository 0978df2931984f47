//! Seeded train/test partitioning

use crate::error::{Result, ServiceError};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Row indices of each partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffle `0..n` with `seed`; the first `ceil(test_size * n)` indices form the test set.
pub fn train_test_split(n: usize, test_size: f64, seed: u64) -> Result<Split> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(ServiceError::TrainingFailure(format!(
            "test_size must be in (0, 1), got {}",
            test_size
        )));
    }

    let n_test = (test_size * n as f64).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(ServiceError::TrainingFailure(format!(
            "{} rows cannot be split into non-empty train and test sets",
            n
        )));
    }

    let mut permutation: Vec<usize> = (0..n).collect();
    permutation.shuffle(&mut StdRng::seed_from_u64(seed));
    let train = permutation.split_off(n_test);

    Ok(Split {
        train,
        test: permutation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes_round_test_up() {
        let split = train_test_split(10, 0.2, 31).unwrap();
        assert_eq!((split.train.len(), split.test.len()), (8, 2));

        let split = train_test_split(11, 0.2, 31).unwrap();
        assert_eq!((split.train.len(), split.test.len()), (8, 3));
    }

    #[test]
    fn test_partition_covers_every_row_once() {
        let split = train_test_split(50, 0.2, 31).unwrap();
        let mut all: Vec<usize> = split.train.iter().chain(&split.test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_seed_fixes_membership() {
        assert_eq!(
            train_test_split(200, 0.2, 31).unwrap(),
            train_test_split(200, 0.2, 31).unwrap()
        );
        assert_ne!(
            train_test_split(200, 0.2, 31).unwrap(),
            train_test_split(200, 0.2, 32).unwrap()
        );
    }

    #[test]
    fn test_too_few_rows() {
        assert!(train_test_split(1, 0.2, 31).is_err());
        assert!(train_test_split(0, 0.2, 31).is_err());
        assert!(train_test_split(10, 1.0, 31).is_err());
    }
}
