use quantcal::calibration::{RangeEstimate, RangeEstimator};
use quantcal::{CalibError, Tensor};

fn rows(r: &[&[f32]]) -> Tensor {
    Tensor::from_rows(&r.iter().map(|x| x.to_vec()).collect::<Vec<_>>()).unwrap()
}

fn close(a: f32, b: f32) -> bool { (a - b).abs() < 1e-5 }

#[test]
fn per_tensor_moving_max_scenario() {
    let mut e = RangeEstimator::per_tensor(0.9).unwrap();
    e.initialize(&rows(&[&[1.0, 2.0, 3.0]])).unwrap();
    assert_eq!(e.current(), Some(&RangeEstimate::PerTensor(3.0)));
    e.update(&rows(&[&[4.0, 0.0, 0.0]])).unwrap();
    match e.current() {
        Some(RangeEstimate::PerTensor(v)) => assert!(close(*v, 3.1), "got {}", v),
        other => panic!("unexpected estimate {:?}", other),
    }
    assert_eq!(e.updates(), 1);
}

#[test]
fn initialize_is_exact_max_for_any_momentum() {
    let batch = rows(&[&[-7.5, 2.0, 0.25], &[1.0, -3.0, 6.0]]);
    for m in [0.0f32, 0.3, 0.9, 0.999] {
        let mut pt = RangeEstimator::per_tensor(m).unwrap();
        pt.initialize(&batch).unwrap();
        assert_eq!(pt.current(), Some(&RangeEstimate::PerTensor(7.5)));
        let mut pa = RangeEstimator::per_axis(-1, m).unwrap();
        pa.initialize(&batch).unwrap();
        assert_eq!(pa.current(), Some(&RangeEstimate::PerAxis(vec![7.5, 3.0, 6.0])));
    }
}

#[test]
fn constant_stream_stays_at_constant_max() {
    let batch = rows(&[&[0.5, -2.0], &[1.5, 1.0]]);
    for m in [0.0f32, 0.5, 0.9] {
        let mut e = RangeEstimator::per_axis(-1, m).unwrap();
        e.observe(&batch).unwrap();
        for _ in 0..50 { e.observe(&batch).unwrap(); }
        let v = e.current().unwrap().as_vec();
        assert!(close(v[0], 1.5) && close(v[1], 2.0), "momentum {}: {:?}", m, v);
    }
}

#[test]
fn estimate_converges_to_new_constant() {
    let mut e = RangeEstimator::per_tensor(0.9).unwrap();
    e.initialize(&rows(&[&[10.0]])).unwrap();
    for _ in 0..300 { e.update(&rows(&[&[2.0]])).unwrap(); }
    assert!(close(e.current().unwrap().at(0), 2.0));
}

#[test]
fn zero_momentum_overwrites() {
    let mut e = RangeEstimator::per_tensor(0.0).unwrap();
    e.initialize(&rows(&[&[10.0]])).unwrap();
    e.update(&rows(&[&[-2.0]])).unwrap();
    assert_eq!(e.current(), Some(&RangeEstimate::PerTensor(2.0)));
}

#[test]
fn update_before_initialize_fails() {
    let mut e = RangeEstimator::per_tensor(0.9).unwrap();
    let err = e.update(&rows(&[&[1.0]])).unwrap_err();
    assert!(matches!(err, CalibError::InvalidState(_)));
    let mut e = RangeEstimator::per_axis(-1, 0.9).unwrap();
    assert!(matches!(e.update(&rows(&[&[1.0, 2.0]])), Err(CalibError::InvalidState(_))));
    assert!(e.current().is_none());
}

#[test]
fn double_initialize_fails() {
    let mut e = RangeEstimator::per_tensor(0.9).unwrap();
    e.initialize(&rows(&[&[1.0]])).unwrap();
    assert!(matches!(e.initialize(&rows(&[&[5.0]])), Err(CalibError::InvalidState(_))));
    assert_eq!(e.current(), Some(&RangeEstimate::PerTensor(1.0)));
}

#[test]
fn axis_size_change_is_shape_mismatch() {
    let mut e = RangeEstimator::per_axis(-1, 0.9).unwrap();
    e.initialize(&rows(&[&[1.0, 2.0, 3.0]])).unwrap();
    let err = e.update(&rows(&[&[1.0, 2.0]])).unwrap_err();
    assert!(matches!(err, CalibError::ShapeMismatch(_)));
    // estimate untouched after the failed update
    assert_eq!(e.current(), Some(&RangeEstimate::PerAxis(vec![1.0, 2.0, 3.0])));
}

#[test]
fn estimate_shape_follows_axis() {
    let batch = Tensor::new(vec![2, 4, 3], (0..24).map(|v| v as f32).collect()).unwrap();
    let mut last = RangeEstimator::per_axis(-1, 0.9).unwrap();
    last.initialize(&batch).unwrap();
    assert_eq!(last.current().unwrap().len(), 3);
    let mut mid = RangeEstimator::per_axis(1, 0.9).unwrap();
    mid.initialize(&batch).unwrap();
    assert_eq!(mid.current().unwrap().len(), 4);
    let mut pt = RangeEstimator::per_tensor(0.9).unwrap();
    pt.initialize(&batch).unwrap();
    assert!(matches!(pt.current(), Some(RangeEstimate::PerTensor(v)) if *v == 23.0));
}

#[test]
fn bad_momentum_rejected() {
    assert!(matches!(RangeEstimator::per_tensor(1.0), Err(CalibError::Config(_))));
    assert!(matches!(RangeEstimator::per_tensor(-0.1), Err(CalibError::Config(_))));
}

#[test]
fn freeze_requires_observation() {
    let e = RangeEstimator::per_tensor(0.9).unwrap();
    assert!(matches!(e.freeze(), Err(CalibError::InvalidState(_))));
    let mut e = RangeEstimator::per_tensor(0.9).unwrap();
    e.observe(&rows(&[&[-4.0]])).unwrap();
    assert_eq!(e.freeze().unwrap(), RangeEstimate::PerTensor(4.0));
}
