use super::{QShell, QVectorSet, QVectorsError, ShellCollector, ShellSampling};
use crate::engine::cancel::CancelToken;
use nalgebra::Vector3;
use rand::Rng;
use rand::rngs::StdRng;
use std::f64::consts::PI;

fn unit_axis(axis: [f64; 3], name: &str) -> Result<Vector3<f64>, QVectorsError> {
    Vector3::from(axis)
        .try_normalize(1e-12)
        .ok_or_else(|| QVectorsError::ZeroAxis(format!("{name} {axis:?}")))
}

/// Draws `n_vectors` per shell, each of modulus `q ± width/2` along `direction(rng)`.
fn draw(
    sampling: &ShellSampling,
    cancel: Option<&CancelToken>,
    mut direction: impl FnMut(&mut StdRng) -> Vector3<f64>,
) -> Result<QVectorSet, QVectorsError> {
    let shells = sampling.validate()?;
    let mut rng = sampling.rng();
    let rng = &mut rng;
    let mut collector = ShellCollector::new(cancel);
    for q in shells {
        let vectors = (0..sampling.n_vectors)
            .map(|_| {
                let modulus = q + sampling.width * (rng.r#gen::<f64>() - 0.5);
                direction(rng) * modulus
            })
            .collect();
        if !collector.push(QShell {
            q,
            vectors,
            hkls: None,
        }) {
            break;
        }
    }
    collector.finish()
}

pub(super) fn spherical(
    sampling: &ShellSampling,
    cancel: Option<&CancelToken>,
) -> Result<QVectorSet, QVectorsError> {
    let direction = |rng: &mut StdRng| {
        let z: f64 = rng.gen_range(-1.0..1.0);
        let phi: f64 = rng.gen_range(0.0..2.0 * PI);
        let rho = (1.0 - z * z).max(0.0).sqrt();
        Vector3::new(rho * phi.cos(), rho * phi.sin(), z)
    };
    draw(sampling, cancel, direction)
}

pub(super) fn circular(
    sampling: &ShellSampling,
    axis_1: [f64; 3],
    axis_2: [f64; 3],
    cancel: Option<&CancelToken>,
) -> Result<QVectorSet, QVectorsError> {
    let e1 = unit_axis(axis_1, "axis_1")?;
    let second = Vector3::from(axis_2);
    let e2 = (second - e1 * e1.dot(&second))
        .try_normalize(1e-12)
        .ok_or_else(|| QVectorsError::InvalidParameter {
            name: "axis_2",
            reason: format!("{axis_2:?} is zero or parallel to axis_1"),
        })?;
    let direction = |rng: &mut StdRng| {
        let theta: f64 = rng.gen_range(0.0..2.0 * PI);
        e1 * theta.cos() + e2 * theta.sin()
    };
    draw(sampling, cancel, direction)
}

pub(super) fn linear(
    sampling: &ShellSampling,
    axis: [f64; 3],
    cancel: Option<&CancelToken>,
) -> Result<QVectorSet, QVectorsError> {
    let e = unit_axis(axis, "axis")?;
    draw(sampling, cancel, |_: &mut StdRng| e)
}
