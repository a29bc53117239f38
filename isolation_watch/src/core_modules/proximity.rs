// THEORY:
// For each person in a frame, how far away is the closest other person? That
// single number is all the engagement state machine needs. Crowds in the target
// setting (a room, an event floor) are tens of people at most, so a brute-force
// O(n^2) scan is used; it also keeps the single-person case trivially exact.

/// Returns, for every center, the Euclidean distance to its nearest other center.
///
/// A lone person gets `f64::INFINITY`. Two people on the same pixel are at distance 0.
pub fn nearest_neighbor_distances(centers: &[(i32, i32)]) -> Vec<f64> {
    centers
        .iter()
        .enumerate()
        .map(|(i, &(cx, cy))| {
            centers
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, &(ox, oy))| {
                    let dx = f64::from(ox) - f64::from(cx);
                    let dy = f64::from(oy) - f64::from(cy);
                    (dx * dx + dy * dy).sqrt()
                })
                .fold(f64::INFINITY, f64::min)
        })
        .collect()
}
