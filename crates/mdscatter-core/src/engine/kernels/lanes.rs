//! Row-major arrays viewed as 1-D lanes along one axis.

use crate::engine::error::AnalysisError;

/// `(outer, len, inner)` of `shape` around `axis`, after checking `data_len` against it.
fn strides(shape: &[usize], axis: usize, data_len: usize) -> Result<(usize, usize, usize), AnalysisError> {
    if axis >= shape.len() {
        return Err(AnalysisError::InvalidInput(format!(
            "axis {axis} is out of range for a {}-dimensional array",
            shape.len()
        )));
    }
    AnalysisError::check_len("array elements", shape.iter().product(), data_len)?;
    let outer = shape[..axis].iter().product();
    let inner = shape[axis + 1..].iter().product();
    Ok((outer, shape[axis], inner))
}

/// Copies every lane of `data` along `axis`, outer index major.
pub fn gather(data: &[f64], shape: &[usize], axis: usize) -> Result<Vec<Vec<f64>>, AnalysisError> {
    let (outer, n, inner) = strides(shape, axis, data.len())?;
    Ok((0..outer)
        .flat_map(|o| (0..inner).map(move |i| (o, i)))
        .map(|(o, i)| (0..n).map(|k| data[(o * n + k) * inner + i]).collect())
        .collect())
}

/// Inverse of [`gather`] for lanes that may have a new common length.
///
/// Returns the data and its shape, which is `shape` with `axis` resized to the lane length.
pub fn scatter(
    lanes: Vec<Vec<f64>>,
    shape: &[usize],
    axis: usize,
) -> Result<(Vec<f64>, Vec<usize>), AnalysisError> {
    let lane_count: usize = shape.iter().enumerate().filter(|&(d, _)| d != axis).map(|(_, &s)| s).product();
    let placeholder: Vec<usize> = shape
        .iter()
        .enumerate()
        .map(|(d, &s)| if d == axis { 1 } else { s })
        .collect();
    let (outer, _, inner) = strides(&placeholder, axis, lane_count)?;
    AnalysisError::check_len("lanes", lane_count, lanes.len())?;

    let m = lanes.first().map_or(0, Vec::len);
    let mut data = vec![0.0; outer * m * inner];
    for (lane_index, lane) in lanes.into_iter().enumerate() {
        AnalysisError::check_len("lane length", m, lane.len())?;
        let (o, i) = (lane_index / inner, lane_index % inner);
        for (k, value) in lane.into_iter().enumerate() {
            data[(o * m + k) * inner + i] = value;
        }
    }
    let mut new_shape = shape.to_vec();
    new_shape[axis] = m;
    Ok((data, new_shape))
}

/// Sums `data` over `axis`, or averages it when `average` is set.
pub fn reduce(
    data: &[f64],
    shape: &[usize],
    axis: usize,
    average: bool,
) -> Result<(Vec<f64>, Vec<usize>), AnalysisError> {
    let (outer, n, inner) = strides(shape, axis, data.len())?;
    let scale = if average && n > 0 { 1.0 / n as f64 } else { 1.0 };
    let mut reduced = vec![0.0; outer * inner];
    for o in 0..outer {
        for k in 0..n {
            for i in 0..inner {
                reduced[o * inner + i] += data[(o * n + k) * inner + i] * scale;
            }
        }
    }
    let mut new_shape = shape.to_vec();
    new_shape.remove(axis);
    Ok((reduced, new_shape))
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2 x 3, rows [0 1 2] and [3 4 5].
    const GRID: [f64; 6] = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];

    #[test]
    fn lanes_follow_the_requested_axis() {
        assert_eq!(gather(&GRID, &[2, 3], 1).unwrap(), vec![vec![0.0, 1.0, 2.0], vec![3.0, 4.0, 5.0]]);
        assert_eq!(
            gather(&GRID, &[2, 3], 0).unwrap(),
            vec![vec![0.0, 3.0], vec![1.0, 4.0], vec![2.0, 5.0]]
        );
    }

    #[test]
    fn scattered_lanes_may_change_length() {
        let lanes = gather(&GRID, &[2, 3], 0).unwrap();
        let longer: Vec<Vec<f64>> = lanes.into_iter().map(|l| vec![l[0], l[1], -1.0]).collect();
        let (data, shape) = scatter(longer, &[2, 3], 0).unwrap();
        assert_eq!(shape, vec![3, 3]);
        assert_eq!(data, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, -1.0, -1.0, -1.0]);
    }

    #[test]
    fn reduce_sums_or_averages_one_axis() {
        assert_eq!(reduce(&GRID, &[2, 3], 0, false).unwrap(), (vec![3.0, 5.0, 7.0], vec![3]));
        assert_eq!(reduce(&GRID, &[2, 3], 1, true).unwrap(), (vec![1.0, 4.0], vec![2]));
    }

    #[test]
    fn bad_axis_or_length_is_rejected() {
        assert!(matches!(gather(&GRID, &[2, 3], 2), Err(AnalysisError::InvalidInput(_))));
        assert!(gather(&GRID, &[4, 2], 0).is_err());
        assert!(scatter(vec![vec![1.0], vec![1.0, 2.0]], &[2, 1], 1).is_err());
    }
}
