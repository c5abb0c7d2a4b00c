//! Associative parallel scan for diagonal linear recurrences.
//!
//! Evaluates `x_t = a_t * x_{t-1} + b_t`, `x_0 = 0` for every position with
//! the operator
//!
//! `combine((a1, b1), (a2, b2)) = (a2 * a1, a2 * b1 + b2)`
//!
//! which is associative, so prefixes can be formed in `ceil(log2 L)` rounds.
//! The transition is diagonal: every state channel and batch element is an
//! independent scan, and each round is a single batched tensor op over them.

use burn::prelude::*;
use burn::tensor::backend::Backend;

use crate::complex::ComplexTensor;

/// Scan element over `[batch, time, state]`: cumulative transition `a` and
/// cumulative driven contribution `b`.
#[derive(Clone, Debug)]
pub struct ScanElement<B: Backend> {
    pub a: ComplexTensor<B, 3>,
    pub b: ComplexTensor<B, 3>,
}

impl<B: Backend> ScanElement<B> {
    pub fn new(a: ComplexTensor<B, 3>, b: ComplexTensor<B, 3>) -> Self {
        Self { a, b }
    }

    pub fn seq_len(&self) -> usize {
        self.a.dims()[1]
    }

    /// Turn padded steps into the identity `(1, 0)` of `combine`.
    ///
    /// `valid` is `[batch, time]`, true for real observations.
    pub fn with_padding(self, valid: Tensor<B, 2, Bool>) -> Self {
        let [_, _, state] = self.a.dims();
        let pad = valid.bool_not().unsqueeze_dim::<3>(2).repeat_dim(2, state);
        Self {
            a: self.a.mask_fill(pad.clone(), 1.0, 0.0),
            b: self.b.mask_fill(pad, 0.0, 0.0),
        }
    }

    fn narrow_time(self, start: usize, length: usize) -> Self {
        Self {
            a: self.a.narrow(1, start, length),
            b: self.b.narrow(1, start, length),
        }
    }

    fn cat_time(first: Self, second: Self) -> Self {
        Self {
            a: ComplexTensor::cat(vec![first.a, second.a], 1),
            b: ComplexTensor::cat(vec![first.b, second.b], 1),
        }
    }
}

/// `earlier` is applied first, then `later`.
pub fn combine<B: Backend>(earlier: ScanElement<B>, later: ScanElement<B>) -> ScanElement<B> {
    let a = later.a.clone().mul(earlier.a);
    let b = later.a.mul(earlier.b).add(later.b);
    ScanElement { a, b }
}

/// Inclusive scan by recursive doubling; returns the hidden states `[batch, time, state]`.
///
/// Round `k` combines every position `t >= 2^k` with position `t - 2^k`
/// of the previous round, so after `ceil(log2 L)` rounds position `t`
/// holds the prefix `1..=t`.
pub fn parallel_scan<B: Backend>(elements: ScanElement<B>) -> ComplexTensor<B, 3> {
    let seq_len = elements.seq_len();
    if seq_len <= 1 {
        return elements.b;
    }

    let mut acc = elements;
    let mut offset = 1;
    while offset < seq_len {
        let keep = acc.clone().narrow_time(0, offset);
        let earlier = acc.clone().narrow_time(0, seq_len - offset);
        let later = acc.narrow_time(offset, seq_len - offset);
        acc = ScanElement::cat_time(keep, combine(earlier, later));
        offset *= 2;
    }
    acc.b
}

/// Step-by-step evaluation of the same recurrence, used as a reference.
pub fn sequential_scan<B: Backend>(elements: ScanElement<B>) -> ComplexTensor<B, 3> {
    let seq_len = elements.seq_len();
    if seq_len <= 1 {
        return elements.b;
    }

    let mut state = elements.clone().narrow_time(0, 1);
    let mut states = vec![state.b.clone()];
    for t in 1..seq_len {
        state = combine(state, elements.clone().narrow_time(t, 1));
        states.push(state.b.clone());
    }
    ComplexTensor::cat(states, 1)
}

/// Generic inclusive associative scan over a slice.
///
/// `op(earlier, later)` must be associative; it does not have to be
/// commutative. Pairs are reduced, the half-length sequence is scanned
/// recursively, and the even positions are filled in from the odd
/// prefixes, giving logarithmic depth.
pub fn associative_scan<T, F>(elements: &[T], op: &F) -> Vec<T>
where
    T: Clone,
    F: Fn(&T, &T) -> T,
{
    let n = elements.len();
    if n < 2 {
        return elements.to_vec();
    }

    let reduced: Vec<T> = elements
        .chunks_exact(2)
        .map(|pair| op(&pair[0], &pair[1]))
        .collect();
    let odd = associative_scan(&reduced, op);

    let mut result = Vec::with_capacity(n);
    result.push(elements[0].clone());
    for i in 1..n {
        if i % 2 == 1 {
            result.push(odd[i / 2].clone());
        } else {
            result.push(op(&odd[i / 2 - 1], &elements[i]));
        }
    }
    result
}

/// Per-position scan elements as a list, for use with [`associative_scan`].
pub fn split_time<B: Backend>(elements: ScanElement<B>) -> Vec<ScanElement<B>> {
    (0..elements.seq_len())
        .map(|t| elements.clone().narrow_time(t, 1))
        .collect()
}

/// Inverse of [`split_time`], keeping only the driven contributions.
pub fn join_states<B: Backend>(elements: Vec<ScanElement<B>>) -> ComplexTensor<B, 3> {
    ComplexTensor::cat(elements.into_iter().map(|e| e.b).collect(), 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    fn random_elements(batch: usize, len: usize, state: usize) -> ScanElement<TestBackend> {
        let device = Default::default();
        let shape = [batch, len, state];
        let uniform = |lo, hi| Tensor::random(shape, Distribution::Uniform(lo, hi), &device);
        ScanElement::new(
            ComplexTensor::new(uniform(-0.9, 0.9), uniform(-0.4, 0.4)),
            ComplexTensor::new(uniform(-1.0, 1.0), uniform(-1.0, 1.0)),
        )
    }

    fn max_abs_diff(x: ComplexTensor<TestBackend, 3>, y: ComplexTensor<TestBackend, 3>) -> f32 {
        let diff = x.sub(y);
        let re = diff.re.abs().max().into_scalar();
        let im = diff.im.abs().max().into_scalar();
        re.max(im)
    }

    #[test]
    fn test_parallel_matches_sequential() {
        for len in [2, 3, 7, 8, 33] {
            let elements = random_elements(3, len, 5);
            let parallel = parallel_scan(elements.clone());
            let sequential = sequential_scan(elements);
            assert_eq!(parallel.dims(), [3, len, 5]);
            let diff = max_abs_diff(parallel, sequential);
            assert!(diff < 1e-5, "len {len}: max diff {diff}");
        }
    }

    #[test]
    fn test_tree_scan_matches_sequential() {
        let elements = random_elements(2, 11, 3);
        let tree = join_states(associative_scan(
            &split_time(elements.clone()),
            &|x: &ScanElement<TestBackend>, y: &ScanElement<TestBackend>| {
                combine(x.clone(), y.clone())
            },
        ));
        let diff = max_abs_diff(tree, sequential_scan(elements));
        assert!(diff < 1e-5, "max diff {diff}");
    }

    #[test]
    fn test_single_step_is_unchanged() {
        let elements = random_elements(2, 1, 4);
        let out = parallel_scan(elements.clone());
        assert_eq!(max_abs_diff(out, elements.b), 0.0);
    }

    #[test]
    fn test_padding_does_not_change_valid_states() {
        let device = Default::default();
        let elements = random_elements(1, 6, 2);
        let reference = parallel_scan(elements.clone().narrow_time(0, 4));

        let valid = Tensor::<TestBackend, 2, Bool>::from_data(
            TensorData::new(vec![true, true, true, true, false, false], [1, 6]),
            &device,
        );
        let padded = parallel_scan(elements.with_padding(valid));

        let diff = max_abs_diff(padded.clone().narrow(1, 0, 4), reference.clone());
        assert!(diff < 1e-6);
        // padded steps carry the last valid state forward unchanged
        let carried = max_abs_diff(padded.narrow(1, 4, 2), ComplexTensor::cat(
            vec![reference.clone().narrow(1, 3, 1), reference.narrow(1, 3, 1)],
            1,
        ));
        assert!(carried < 1e-6);
    }

    #[test]
    fn test_associative_scan_generic_prefix_sums() {
        let values: Vec<i64> = (1..=10).collect();
        let sums = associative_scan(&values, &|a: &i64, b: &i64| a + b);
        assert_eq!(sums, vec![1, 3, 6, 10, 15, 21, 28, 36, 45, 55]);
        assert!(associative_scan(&Vec::<i64>::new(), &|a: &i64, b: &i64| a + b).is_empty());
    }

    #[test]
    fn test_associative_scan_respects_order() {
        // string concatenation is associative but not commutative
        let words: Vec<String> = ["a", "b", "c", "d", "e"].iter().map(|s| s.to_string()).collect();
        let out = associative_scan(&words, &|x: &String, y: &String| format!("{x}{y}"));
        assert_eq!(out, vec!["a", "ab", "abc", "abcd", "abcde"]);
    }
}
