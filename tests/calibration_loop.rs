use quantcal::calibration::{calibrate, BatchObserver, CalibrationParams, RangeEstimate, RangeEstimator, SampleSet};
use quantcal::{CalibError, Result, Tensor};

struct Recorder { sizes: Vec<usize> }

impl BatchObserver for Recorder {
    fn observe(&mut self, batch: &Tensor) -> Result<()> { self.sizes.push(batch.batch_size()); Ok(()) }
}

fn params(num_samples: usize, batch_size: Option<usize>, epochs: usize) -> CalibrationParams {
    CalibrationParams { num_samples, batch_size, epochs, ..CalibrationParams::default() }
}

#[test]
fn steps_round_up() {
    assert_eq!(params(1024, Some(100), 1).steps(), 11);
    assert_eq!(params(1000, Some(100), 1).steps(), 10);
    assert_eq!(params(7, None, 1).steps(), 7);
}

#[test]
fn runs_epochs_times_steps_batches() {
    let set = Tensor::new(vec![5, 2], (0..10).map(|v| v as f32).collect()).unwrap();
    let mut src = SampleSet::new(set).unwrap();
    let mut rec = Recorder { sizes: Vec::new() };
    let st = calibrate(&mut src, &mut rec, &params(10, Some(4), 3)).unwrap();
    assert_eq!(st.steps, 3);
    assert_eq!(st.batches, 9);
    assert_eq!(rec.sizes, vec![4; 9]);
    assert_eq!(st.samples, 36);
}

#[test]
fn no_batch_size_means_single_samples() {
    let set = Tensor::new(vec![3, 1], vec![1.0, 2.0, 3.0]).unwrap();
    let mut src = SampleSet::new(set).unwrap();
    let mut rec = Recorder { sizes: Vec::new() };
    let st = calibrate(&mut src, &mut rec, &params(4, None, 2)).unwrap();
    assert_eq!(st.batches, 8);
    assert!(rec.sizes.iter().all(|&s| s == 1));
}

#[test]
fn first_batch_initializes_then_updates() {
    // cycling [[1,2,3]], [[4,0,0]] per-tensor
    let set = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 0.0, 0.0]).unwrap();
    let mut src = SampleSet::new(set).unwrap();
    let mut est = RangeEstimator::per_tensor(0.9).unwrap();
    calibrate(&mut src, &mut est, &params(2, Some(1), 1)).unwrap();
    assert_eq!(est.updates(), 1);
    match est.current() {
        Some(RangeEstimate::PerTensor(v)) => assert!((v - 3.1).abs() < 1e-5),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn shape_mismatch_aborts_run() {
    struct Shifting { n: usize }
    impl quantcal::calibration::SampleSource for Shifting {
        fn next_batch(&mut self, bs: usize) -> Result<Tensor> {
            self.n += 1;
            let w = if self.n == 1 { 3 } else { 2 };
            Ok(Tensor::zeros(vec![bs, w]))
        }
        fn sample_shape(&self) -> &[usize] { &[] }
    }
    let mut est = RangeEstimator::per_axis(-1, 0.9).unwrap();
    let err = calibrate(&mut Shifting { n: 0 }, &mut est, &params(10, Some(2), 1)).unwrap_err();
    assert!(matches!(err, CalibError::ShapeMismatch(_)));
}

#[test]
fn invalid_params_rejected() {
    let set = Tensor::new(vec![1, 1], vec![1.0]).unwrap();
    let mut src = SampleSet::new(set).unwrap();
    let mut est = RangeEstimator::per_tensor(0.9).unwrap();
    for p in [params(10, Some(0), 1), params(10, Some(2), 0), params(0, None, 1)] {
        assert!(matches!(calibrate(&mut src, &mut est, &p), Err(CalibError::Config(_))));
    }
    let mut p = params(10, Some(2), 1);
    p.momentum = 1.0;
    assert!(matches!(calibrate(&mut src, &mut est, &p), Err(CalibError::Config(_))));
    assert!(!est.is_initialized());
}

#[test]
fn frozen_random_samples_replay_each_epoch() {
    struct Keep { batches: Vec<Tensor> }
    impl BatchObserver for Keep {
        fn observe(&mut self, batch: &Tensor) -> Result<()> { self.batches.push(batch.clone()); Ok(()) }
    }
    let mut src = quantcal::calibration::RandomSamples::new(vec![8], 3).unwrap().into_sample_set(4).unwrap();
    let mut keep = Keep { batches: Vec::new() };
    calibrate(&mut src, &mut keep, &params(4, Some(4), 2)).unwrap();
    assert_eq!(keep.batches.len(), 2);
    assert_eq!(keep.batches[0], keep.batches[1]);
}
