//! Simple threshold-based floating point asserts for tests.
//!
//! Thresholds here are intentionally bigger than epsilon; convolution in two different domains
//! agrees to roughly 1e-4, not to the last bit.

#[track_caller]
pub(crate) fn close_floats32(a: f32, b: f32, threshold: f32) {
    let diff = (a - b).abs();
    assert!(
        diff < threshold,
        "{} vs {}, difference {} is greater than threshold {}",
        a,
        b,
        diff,
        threshold
    );
}

#[track_caller]
pub(crate) fn close_slices32(a: &[f32], b: &[f32], threshold: f32) {
    assert_eq!(a.len(), b.len(), "slice lengths differ");
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        let diff = (x - y).abs();
        assert!(
            diff < threshold,
            "index {}: {} vs {}, difference {} is greater than threshold {}",
            i,
            x,
            y,
            diff,
            threshold
        );
    }
}
