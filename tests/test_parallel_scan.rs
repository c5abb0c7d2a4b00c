//! Scan operator properties and parallel vs left-fold agreement.

use burn::prelude::*;
use proptest::prelude::*;
use s5_rust::device::init_device;
use s5_rust::parallel_scan::{combine, join_states, split_time};
use s5_rust::{associative_scan, parallel_scan, sequential_scan, ComplexTensor, ScanElement};

type TestBackend = s5_rust::device::Backend;

/// `(a_re, a_im, b_re, b_im)` per step
type Step = (f64, f64, f64, f64);

fn elements(steps: &[Step]) -> ScanElement<TestBackend> {
    let device = init_device();
    let len = steps.len();
    let column = |f: fn(&Step) -> f64| {
        let values: Vec<f32> = steps.iter().map(|s| f(s) as f32).collect();
        Tensor::<TestBackend, 3>::from_data(TensorData::new(values, [1, len, 1]), &device)
    };
    ScanElement::new(
        ComplexTensor::new(column(|s| s.0), column(|s| s.1)),
        ComplexTensor::new(column(|s| s.2), column(|s| s.3)),
    )
}

/// Left fold of `x_t = a_t x_{t-1} + b_t` in f64.
fn fold_reference(steps: &[Step]) -> Vec<(f64, f64)> {
    let mut x = (0.0, 0.0);
    steps
        .iter()
        .map(|&(a_re, a_im, b_re, b_im)| {
            x = (a_re * x.0 - a_im * x.1 + b_re, a_re * x.1 + a_im * x.0 + b_im);
            x
        })
        .collect()
}

fn to_pairs(states: ComplexTensor<TestBackend, 3>) -> Vec<(f64, f64)> {
    let re = states.re.into_data().to_vec::<f32>().unwrap();
    let im = states.im.into_data().to_vec::<f32>().unwrap();
    re.into_iter().zip(im).map(|(r, i)| (r as f64, i as f64)).collect()
}

fn max_diff(a: &[(f64, f64)], b: &[(f64, f64)]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x.0 - y.0).abs().max((x.1 - y.1).abs()))
        .fold(0.0, f64::max)
}

/// Stable transitions: |a| <= 0.99.
fn step_strategy() -> impl Strategy<Value = Step> {
    (0.0f64..0.99, -std::f64::consts::PI..std::f64::consts::PI, -1.0f64..1.0, -1.0f64..1.0)
        .prop_map(|(r, theta, b_re, b_im)| (r * theta.cos(), r * theta.sin(), b_re, b_im))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn parallel_scan_matches_left_fold(steps in prop::collection::vec(step_strategy(), 1..40)) {
        let expected = fold_reference(&steps);
        let parallel = to_pairs(parallel_scan(elements(&steps)));
        let sequential = to_pairs(sequential_scan(elements(&steps)));
        prop_assert!(max_diff(&parallel, &expected) < 1e-4);
        prop_assert!(max_diff(&sequential, &expected) < 1e-4);
    }

    #[test]
    fn tree_scan_matches_left_fold(steps in prop::collection::vec(step_strategy(), 1..24)) {
        let expected = fold_reference(&steps);
        let scanned = associative_scan(&split_time(elements(&steps)), &|earlier: &ScanElement<TestBackend>, later: &ScanElement<TestBackend>| {
            combine(earlier.clone(), later.clone())
        });
        prop_assert!(max_diff(&to_pairs(join_states(scanned)), &expected) < 1e-4);
    }

    #[test]
    fn combine_is_associative(
        e1 in step_strategy(),
        e2 in step_strategy(),
        e3 in step_strategy(),
    ) {
        let [e1, e2, e3] = [e1, e2, e3].map(|s| elements(&[s]));
        let left = combine(combine(e1.clone(), e2.clone()), e3.clone());
        let right = combine(e1, combine(e2, e3));
        prop_assert!(max_diff(&to_pairs(left.a), &to_pairs(right.a)) < 1e-5);
        prop_assert!(max_diff(&to_pairs(left.b), &to_pairs(right.b)) < 1e-5);
    }

    #[test]
    fn generic_scan_preserves_order(values in prop::collection::vec(0u8..26, 0..50)) {
        let letters: Vec<String> = values.iter().map(|v| ((b'a' + v) as char).to_string()).collect();
        let scanned = associative_scan(&letters, &|a: &String, b: &String| format!("{a}{b}"));
        let mut prefix = String::new();
        for (got, letter) in scanned.iter().zip(&letters) {
            prefix.push_str(letter);
            prop_assert_eq!(got, &prefix);
        }
        prop_assert_eq!(scanned.len(), letters.len());
    }
}

#[test]
fn test_identity_element_is_neutral() {
    let steps = [(0.5, 0.2, 1.0, -1.0), (0.3, -0.4, 0.5, 0.25)];
    let identity = elements(&[(1.0, 0.0, 0.0, 0.0)]);
    for step in steps {
        let e = elements(&[step]);
        let left = combine(identity.clone(), e.clone());
        let right = combine(e.clone(), identity.clone());
        assert!(max_diff(&to_pairs(left.b), &to_pairs(e.b.clone())) < 1e-7);
        assert!(max_diff(&to_pairs(right.a), &to_pairs(e.a)) < 1e-7);
    }
}
