//! Toy sequence datasets
//!
//! Every fixture is a set of consecutive-integer ramps: sequence `i` starts at `start + i`.

use crate::tensor::Sequence;

/// Seven ramps of length 7 starting at 1..=7, i.e. `[1..7], [2..8], ..., [7..13]`
pub fn training_sequences() -> Vec<Sequence> {
    ramp_sequences(1, 7, 7)
}

/// Three ramps of length 7 starting at 8..=10, i.e. `[8..14], [9..15], [10..16]`
pub fn validation_sequences() -> Vec<Sequence> {
    ramp_sequences(8, 3, 7)
}

/// Generates `count` ramps of `len` consecutive integers
pub fn ramp_sequences(start: i32, count: usize, len: usize) -> Vec<Sequence> {
    (0..count as i32)
        .map(|i| (0..len as i32).map(|t| (start + i + t) as f32).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures() {
        let training = training_sequences();
        assert_eq!(training.len(), 7);
        assert_eq!(training[0], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(training[6], vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0]);

        let validation = validation_sequences();
        assert_eq!(validation.len(), 3);
        assert_eq!(validation[0][0], 8.0);
        assert_eq!(validation[2][6], 16.0);
    }
}
