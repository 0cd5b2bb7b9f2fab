// Foreach — Elementwise kernels applied across a batch of buffers
//
// An optimizer step touches one buffer per active parameter, and every
// parameter has its own shape. Instead of flattening everything into one
// array, each kernel walks a list of (destination, source...) tuples and
// applies the same scalar closure to every element of every tuple.
//
// Buffers belonging to different parameters never alias, so the order in
// which tuples are visited does not change the result.
//
// The batch length and the element count of every tuple are checked before
// anything is written; a mismatch is a ShapeMismatch error and leaves all
// destinations untouched.

use crate::error::{OptimError, Result};

fn check_batch(what: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(OptimError::shape(
            format!("{what} batch"),
            &[expected],
            &[actual],
        ));
    }
    Ok(())
}

fn check_lens(what: &str, dst: &[&mut [f64]], src: &[&[f64]]) -> Result<()> {
    check_batch(what, dst.len(), src.len())?;
    for (d, s) in dst.iter().zip(src.iter()) {
        if d.len() != s.len() {
            return Err(OptimError::shape(what, &[d.len()], &[s.len()]));
        }
    }
    Ok(())
}

/// `op(dst[i][j], src[i][j])` for every buffer `i` and element `j`.
pub fn zip_apply<F>(what: &str, dst: &mut [&mut [f64]], src: &[&[f64]], op: F) -> Result<()>
where
    F: Fn(&mut f64, f64),
{
    check_lens(what, dst, src)?;
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        for (x, &y) in d.iter_mut().zip(s.iter()) {
            op(x, y);
        }
    }
    Ok(())
}

/// `op(dst[i][j], a[i][j], b[i][j])` for every buffer `i` and element `j`.
pub fn zip3_apply<F>(
    what: &str,
    dst: &mut [&mut [f64]],
    a: &[&[f64]],
    b: &[&[f64]],
    op: F,
) -> Result<()>
where
    F: Fn(&mut f64, f64, f64),
{
    check_lens(what, dst, a)?;
    check_lens(what, dst, b)?;
    for ((d, a), b) in dst.iter_mut().zip(a.iter()).zip(b.iter()) {
        for ((x, &y), &z) in d.iter_mut().zip(a.iter()).zip(b.iter()) {
            op(x, y, z);
        }
    }
    Ok(())
}

/// Fresh buffers holding `op(a[i][j], b[i][j])`.
pub fn zip_map<F>(what: &str, a: &[&[f64]], b: &[&[f64]], op: F) -> Result<Vec<Vec<f64>>>
where
    F: Fn(f64, f64) -> f64,
{
    check_batch(what, a.len(), b.len())?;
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            if x.len() != y.len() {
                return Err(OptimError::shape(what, &[x.len()], &[y.len()]));
            }
            Ok(x.iter().zip(y.iter()).map(|(&x, &y)| op(x, y)).collect())
        })
        .collect()
}

/// Borrow a list of owned buffers as slices.
pub fn as_slices(bufs: &[Vec<f64>]) -> Vec<&[f64]> {
    bufs.iter().map(Vec::as_slice).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_apply_touches_each_pair_independently() {
        let mut a = vec![1.0, 2.0];
        let mut b = vec![10.0];
        let (ones, five) = ([1.0, 1.0], [5.0]);
        let src: Vec<&[f64]> = vec![ones.as_slice(), five.as_slice()];
        let mut dst: Vec<&mut [f64]> = vec![a.as_mut_slice(), b.as_mut_slice()];
        zip_apply("add", &mut dst, &src, |x, y| *x += y).unwrap();
        assert_eq!(a, vec![2.0, 3.0]);
        assert_eq!(b, vec![15.0]);
    }

    #[test]
    fn mismatched_batches_write_nothing() {
        let mut a = vec![1.0, 2.0];
        let mut b = vec![3.0];
        let ones = [1.0, 1.0];
        let src: Vec<&[f64]> = vec![ones.as_slice(), ones.as_slice()];
        let mut dst: Vec<&mut [f64]> = vec![a.as_mut_slice(), b.as_mut_slice()];
        let err = zip_apply("add", &mut dst, &src, |x, y| *x += y);
        assert!(matches!(err, Err(OptimError::ShapeMismatch { .. })));
        assert_eq!(a, vec![1.0, 2.0]);

        let mut c = vec![0.0];
        let mut dst: Vec<&mut [f64]> = vec![c.as_mut_slice()];
        assert!(zip_apply("add", &mut dst, &[], |x, y| *x += y).is_err());
    }

    #[test]
    fn zip3_and_map() {
        let mut d = vec![0.0, 0.0];
        let (a, b) = ([2.0, 3.0], [4.0, 5.0]);
        let mut dst: Vec<&mut [f64]> = vec![d.as_mut_slice()];
        zip3_apply("fma", &mut dst, &[a.as_slice()], &[b.as_slice()], |x, a, b| {
            *x = a * b
        })
        .unwrap();
        assert_eq!(d, vec![8.0, 15.0]);

        let (num, den) = ([4.0, 9.0], [2.0, 3.0]);
        let out = zip_map("div", &[num.as_slice()], &[den.as_slice()], |a, b| a / b).unwrap();
        assert_eq!(out, vec![vec![2.0, 3.0]]);
    }
}
