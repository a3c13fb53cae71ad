use quantcal::calibration::samples::write_samples;
use quantcal::calibration::{RandomSamples, SampleSet, SampleSource};
use quantcal::{CalibError, Tensor};

#[test]
fn sample_set_cycles_across_the_end() {
    let t = Tensor::new(vec![3, 2], vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5]).unwrap();
    let mut s = SampleSet::new(t).unwrap();
    let b1 = s.next_batch(2).unwrap();
    assert_eq!(b1.data, vec![0.0, 0.5, 1.0, 1.5]);
    let b2 = s.next_batch(2).unwrap();
    assert_eq!(b2.shape, vec![2, 2]);
    assert_eq!(b2.data, vec![2.0, 2.5, 0.0, 0.5]);
}

#[test]
fn empty_sample_set_rejected() {
    let t = Tensor::new(vec![0, 4], vec![]).unwrap();
    assert!(matches!(SampleSet::new(t), Err(CalibError::Config(_))));
}

#[test]
fn image_like_inputs_are_unsigned_bytes() {
    for ch in [1usize, 3] {
        let mut r = RandomSamples::new(vec![4, 4, ch], 7).unwrap();
        let b = r.next_batch(8).unwrap();
        assert_eq!(b.shape, vec![8, 4, 4, ch]);
        assert!(b.data.iter().all(|v| (0.0..=255.0).contains(v) && v.fract() == 0.0));
    }
}

#[test]
fn other_inputs_are_signed_bytes() {
    let mut r = RandomSamples::new(vec![16], 7).unwrap();
    let b = r.next_batch(64).unwrap();
    assert!(b.data.iter().all(|v| (-128.0..=127.0).contains(v)));
    assert!(b.data.iter().any(|v| *v < 0.0));
    assert_eq!(RandomSamples::value_range(&[16]), (-128, 127));
    assert_eq!(RandomSamples::value_range(&[28, 28, 1]), (0, 255));
}

#[test]
fn random_samples_are_seeded() {
    let a = RandomSamples::new(vec![5], 11).unwrap().next_batch(4).unwrap();
    let b = RandomSamples::new(vec![5], 11).unwrap().next_batch(4).unwrap();
    assert_eq!(a, b);
}

#[test]
fn samples_file_roundtrip() {
    std::fs::create_dir_all("target").unwrap();
    let path = "target/quantcal_samples_test.json";
    let mut r = RandomSamples::new(vec![2, 3], 1).unwrap();
    let written = write_samples(&mut r, 5, path).unwrap();
    let set = SampleSet::load(path).unwrap();
    assert_eq!(set.len(), 5);
    assert_eq!(set.tensor(), &written);
}

#[test]
fn malformed_samples_file_is_reported() {
    std::fs::create_dir_all("target").unwrap();
    let path = "target/quantcal_bad_samples.json";
    std::fs::write(path, r#"{"shape": [2, 2], "data": [1.0, 2.0, 3.0]}"#).unwrap();
    assert!(matches!(SampleSet::load(path), Err(CalibError::ShapeMismatch(_))));
}

#[test]
fn frozen_random_set_cycles_same_samples() {
    let mut set = RandomSamples::new(vec![3], 9).unwrap().into_sample_set(5).unwrap();
    assert_eq!(set.len(), 5);
    let first = set.next_batch(5).unwrap();
    let again = set.next_batch(5).unwrap();
    assert_eq!(first, again);
    assert_eq!(&first, set.tensor());
}
