use super::{IntRange, QShell, QVectorSet, QVectorsError, ShellCollector, ShellSampling};
use crate::engine::cancel::CancelToken;
use nalgebra::{Matrix3, Vector3};
use rand::seq::index::sample;
use std::collections::BTreeMap;

/// An integer triple and its reciprocal-space vector.
type Candidate = ([i32; 3], Vector3<f64>);

fn to_vector(reciprocal: &Matrix3<f64>, hkl: [i32; 3]) -> Vector3<f64> {
    reciprocal.tr_mul(&Vector3::new(hkl[0] as f64, hkl[1] as f64, hkl[2] as f64))
}

fn combine(n: &[i32], axes: &[[i32; 3]]) -> [i32; 3] {
    let mut hkl = [0; 3];
    for (factor, axis) in n.iter().zip(axes) {
        for (h, a) in hkl.iter_mut().zip(axis) {
            *h += factor * a;
        }
    }
    hkl
}

/// Number of lattice steps along `step` needed to reach `q_max`.
fn bound(q_max: f64, axis: [i32; 3], step: &Vector3<f64>) -> Result<i32, QVectorsError> {
    let length = step.norm();
    if length == 0.0 {
        return Err(QVectorsError::ZeroAxis(format!("{axis:?}")));
    }
    Ok((q_max / length).ceil() as i32 + 1)
}

/// All non-zero integer combinations of `axes` within the bounding box of `q_max`.
fn enumerate(
    reciprocal: &Matrix3<f64>,
    axes: &[[i32; 3]],
    q_max: f64,
) -> Result<Vec<Candidate>, QVectorsError> {
    let bounds = axes
        .iter()
        .map(|&axis| bound(q_max, axis, &to_vector(reciprocal, axis)))
        .collect::<Result<Vec<_>, _>>()?;

    let mut candidates = Vec::new();
    let mut n = bounds.iter().map(|b| -b).collect::<Vec<_>>();
    'outer: loop {
        let hkl = combine(&n, axes);
        if hkl != [0; 3] {
            candidates.push((hkl, to_vector(reciprocal, hkl)));
        }
        for d in (0..n.len()).rev() {
            if n[d] < bounds[d] {
                n[d] += 1;
                continue 'outer;
            }
            n[d] = -bounds[d];
        }
        break;
    }
    Ok(candidates)
}

fn sample_shells(
    sampling: &ShellSampling,
    reciprocal: &Matrix3<f64>,
    axes: &[[i32; 3]],
    cancel: Option<&CancelToken>,
) -> Result<QVectorSet, QVectorsError> {
    let shells = sampling.validate()?;
    let q_max = shells.iter().copied().fold(0.0, f64::max) + sampling.width / 2.0;
    let candidates = enumerate(reciprocal, axes, q_max)?;
    let mut rng = sampling.rng();

    let mut collector = ShellCollector::new(cancel);
    for q in shells {
        let mut in_shell: Vec<&Candidate> = candidates
            .iter()
            .filter(|(_, v)| sampling.accepts(q, v.norm()))
            .collect();
        if in_shell.len() > sampling.n_vectors {
            let mut picked = sample(&mut rng, in_shell.len(), sampling.n_vectors).into_vec();
            picked.sort_unstable();
            in_shell = picked.into_iter().map(|i| in_shell[i]).collect();
        }
        let shell = QShell {
            q,
            vectors: in_shell.iter().map(|(_, v)| *v).collect(),
            hkls: Some(in_shell.iter().map(|(hkl, _)| *hkl).collect()),
        };
        if !collector.push(shell) {
            break;
        }
    }
    collector.finish()
}

pub(super) fn spherical(
    sampling: &ShellSampling,
    reciprocal: &Matrix3<f64>,
    cancel: Option<&CancelToken>,
) -> Result<QVectorSet, QVectorsError> {
    sample_shells(sampling, reciprocal, &[[1, 0, 0], [0, 1, 0], [0, 0, 1]], cancel)
}

pub(super) fn circular(
    sampling: &ShellSampling,
    reciprocal: &Matrix3<f64>,
    axis_1: [i32; 3],
    axis_2: [i32; 3],
    cancel: Option<&CancelToken>,
) -> Result<QVectorSet, QVectorsError> {
    let (u, v) = (to_vector(reciprocal, axis_1), to_vector(reciprocal, axis_2));
    if u.cross(&v).norm() < 1e-12 * u.norm() * v.norm() {
        return Err(QVectorsError::InvalidParameter {
            name: "axis_2",
            reason: format!("{axis_2:?} is parallel to {axis_1:?}"),
        });
    }
    sample_shells(sampling, reciprocal, &[axis_1, axis_2], cancel)
}

pub(super) fn linear(
    sampling: &ShellSampling,
    reciprocal: &Matrix3<f64>,
    axis: [i32; 3],
    cancel: Option<&CancelToken>,
) -> Result<QVectorSet, QVectorsError> {
    sample_shells(sampling, reciprocal, &[axis], cancel)
}

/// Every `hkl` of the three ranges, grouped into shells of width `qstep`.
pub(super) fn grid(
    reciprocal: &Matrix3<f64>,
    ranges: [&IntRange; 3],
    qstep: f64,
    cancel: Option<&CancelToken>,
) -> Result<QVectorSet, QVectorsError> {
    if !(qstep > 0.0) {
        return Err(QVectorsError::InvalidParameter {
            name: "qstep",
            reason: format!("must be positive, got {qstep}"),
        });
    }
    let (hs, ks, ls) = (
        ranges[0].values("hrange")?,
        ranges[1].values("krange")?,
        ranges[2].values("lrange")?,
    );

    let mut shells: BTreeMap<i64, Vec<Candidate>> = BTreeMap::new();
    for &h in &hs {
        for &k in &ks {
            for &l in &ls {
                if [h, k, l] == [0; 3] {
                    continue;
                }
                let vector = to_vector(reciprocal, [h, k, l]);
                let key = (vector.norm() / qstep).round() as i64;
                shells.entry(key).or_default().push(([h, k, l], vector));
            }
        }
    }

    let mut collector = ShellCollector::new(cancel);
    for (key, members) in shells {
        let shell = QShell {
            q: key as f64 * qstep,
            vectors: members.iter().map(|(_, v)| *v).collect(),
            hkls: Some(members.iter().map(|(hkl, _)| *hkl).collect()),
        };
        if !collector.push(shell) {
            break;
        }
    }
    collector.finish()
}

#[cfg(test)]
mod tests {
    use super::super::{QVectors, ShellRange};
    use super::*;
    use crate::core::geometry::unit_cell::UnitCell;
    use std::f64::consts::PI;

    fn sampling(q: f64, n_vectors: usize, width: f64) -> ShellSampling {
        ShellSampling {
            shells: ShellRange::single(q),
            n_vectors,
            width,
            seed: 7,
        }
    }

    #[test]
    fn first_cubic_shell_holds_the_six_axis_vectors() {
        let cell = UnitCell::cubic(1.0).unwrap();
        let set = QVectors::SphericalLattice {
            sampling: sampling(2.0 * PI, 100, 0.1),
        }
        .generate(Some(&cell), None)
        .unwrap();
        assert_eq!(set.shells.len(), 1);
        let hkls = set.shells[0].hkls.as_ref().unwrap();
        assert_eq!(hkls.len(), 6);
        assert!(hkls.iter().all(|hkl| hkl.iter().map(|h| h.abs()).sum::<i32>() == 1));
        assert!(set.shells[0].vectors.iter().all(|v| (v.norm() - 2.0 * PI).abs() < 1e-12));
    }

    #[test]
    fn oversized_shells_are_downsampled_reproducibly() {
        let cell = UnitCell::cubic(1.0).unwrap();
        let generator = QVectors::SphericalLattice {
            sampling: sampling(2.0 * PI, 3, 0.1),
        };
        let first = generator.generate(Some(&cell), None).unwrap();
        let second = generator.generate(Some(&cell), None).unwrap();
        assert_eq!(first.shells[0].len(), 3);
        assert_eq!(first, second);
    }

    #[test]
    fn linear_lattice_follows_its_axis() {
        let cell = UnitCell::orthorhombic(1.0, 2.0, 4.0).unwrap();
        let set = QVectors::LinearLattice {
            sampling: ShellSampling {
                shells: ShellRange {
                    first: PI / 2.0,
                    last: PI,
                    step: PI / 2.0,
                },
                n_vectors: 10,
                width: 0.01,
                seed: 3,
            },
            axis: [0, 0, 1],
        }
        .generate(Some(&cell), None)
        .unwrap();
        assert_eq!(set.q_values().len(), 2);
        assert_eq!(set.shells[0].hkls.as_ref().unwrap(), &vec![[0, 0, -1], [0, 0, 1]]);
        assert_eq!(set.shells[1].hkls.as_ref().unwrap(), &vec![[0, 0, -2], [0, 0, 2]]);
    }

    #[test]
    fn degenerate_axes_are_rejected() {
        let cell = UnitCell::cubic(1.0).unwrap();
        let linear = QVectors::LinearLattice {
            sampling: sampling(1.0, 10, 0.1),
            axis: [0, 0, 0],
        };
        assert!(matches!(linear.generate(Some(&cell), None), Err(QVectorsError::ZeroAxis(_))));
        let circular = QVectors::CircularLattice {
            sampling: sampling(1.0, 10, 0.1),
            axis_1: [1, 0, 0],
            axis_2: [2, 0, 0],
        };
        assert!(circular.generate(Some(&cell), None).is_err());
    }

    #[test]
    fn grid_groups_vectors_by_rounded_modulus() {
        let cell = UnitCell::cubic(2.0 * PI).unwrap();
        let range = |first, last| IntRange { first, last, step: 1 };
        let set = QVectors::GridLattice {
            hrange: range(0, 2),
            krange: range(0, 1),
            lrange: range(0, 0),
            qstep: 1.0,
        }
        .generate(Some(&cell), None)
        .unwrap();
        // |(h, k, 0)| with unit reciprocal vectors: 1, 1, sqrt(2), 2, sqrt(5).
        assert_eq!(set.q_values(), vec![1.0, 2.0]);
        assert_eq!(set.shells[0].len(), 3);
        assert_eq!(set.shells[1].len(), 2);
    }

    #[test]
    fn empty_selection_is_an_error() {
        let cell = UnitCell::cubic(1.0).unwrap();
        let generator = QVectors::SphericalLattice {
            sampling: sampling(1.0, 10, 0.01),
        };
        assert_eq!(generator.generate(Some(&cell), None), Err(QVectorsError::EmptyShells));
    }
}
