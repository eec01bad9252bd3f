use forward_operators::core::precision::{
    build_precision_matrix_scalar, estimate_uncertainty, UncertaintyModel,
};
use forward_operators::{build_precision_matrix, Mask, OperatorError};
use ndarray::Array2;

fn checkerboard(shape: (usize, usize)) -> Mask {
    Mask::from_shape_fn(shape, |(i, j)| (i + j) % 3 != 0)
}

#[test]
fn test_diagonal_follows_mask_for_many_shapes() {
    for &shape in &[(1, 1), (1, 7), (4, 1), (3, 5), (16, 9)] {
        let uncertainty = Array2::from_shape_fn(shape, |(i, j)| 0.1 + 0.05 * (i * shape.1 + j) as f64);
        let mask = checkerboard(shape);

        let precision = build_precision_matrix(&uncertainty, &mask).unwrap();
        let n = shape.0 * shape.1;
        assert_eq!(precision.shape(), (n, n));

        for (k, (&sigma, &valid)) in uncertainty.iter().zip(mask.iter()).enumerate() {
            if valid {
                assert_eq!(precision.get(k, k), 1.0 / (sigma * sigma));
            } else {
                assert_eq!(precision.get(k, k), 0.0);
            }
        }
    }
}

#[test]
fn test_off_diagonal_is_zero() {
    let shape = (3, 4);
    let uncertainty = Array2::from_elem(shape, 0.5);
    let precision = build_precision_matrix(&uncertainty, &Mask::from_elem(shape, true)).unwrap();
    let dense = precision.to_dense();

    for ((i, j), &value) in dense.indexed_iter() {
        if i != j {
            assert_eq!(value, 0.0);
        } else {
            assert_eq!(value, 4.0);
        }
    }
    assert_eq!(precision.nnz(), 12);
}

#[test]
fn test_fully_masked_scene() {
    let precision = build_precision_matrix_scalar(1.0, &Mask::from_elem((5, 5), false)).unwrap();
    assert_eq!(precision.shape(), (25, 25));
    assert!(precision.diagonal().iter().all(|&w| w == 0.0));
}

#[test]
fn test_uncertainty_is_recomputed_per_call() {
    let mask = Mask::from_elem((2, 2), true);
    let low = Array2::from_elem((2, 2), 0.1);
    let high = Array2::from_elem((2, 2), 10.0);

    let a = estimate_uncertainty(&low, &mask, UncertaintyModel::default()).unwrap();
    let b = estimate_uncertainty(&high, &mask, UncertaintyModel::default()).unwrap();
    let a_again = estimate_uncertainty(&low, &mask, UncertaintyModel::default()).unwrap();

    assert_eq!(a, a_again);
    assert!(b[[0, 0]] > a[[0, 0]]);
}

#[test]
fn test_mismatched_shapes_fail() {
    let uncertainty = Array2::from_elem((2, 2), 1.0);
    let mask = Mask::from_elem((2, 3), true);
    assert!(matches!(
        build_precision_matrix(&uncertainty, &mask),
        Err(OperatorError::ShapeMismatch(_))
    ));
}
