//! Complete-linkage agglomerative clustering for heatmap ordering

/// Euclidean distance
fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
}

/// Nearest active cluster after `a` (higher index), first one on ties
fn nearest_after(dist: &[Vec<f64>], active: &[usize], a: usize) -> (f64, usize) {
    let mut best = (f64::INFINITY, usize::MAX);
    for &c in active.iter().filter(|&&c| c > a) {
        if dist[a][c] < best.0 {
            best = (dist[a][c], c);
        }
    }
    best
}

/// Leaf order of a complete-linkage dendrogram over `rows`.
///
/// Clusters merge until one remains; each merge appends the second cluster's
/// members after the first's, so the final member list is the leaf order.
/// Ties go to the earliest pair.
///
/// Each cluster caches its nearest neighbour among later clusters. Complete
/// linkage only ever raises distances, so a merge invalidates just the caches
/// that pointed at the merged pair.
pub fn hierarchical_order(rows: &[Vec<f64>]) -> Vec<usize> {
    let n = rows.len();
    if n < 3 {
        return (0..n).collect();
    }

    let mut dist = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = euclidean(&rows[i], &rows[j]);
            dist[i][j] = d;
            dist[j][i] = d;
        }
    }

    let mut members: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
    let mut active: Vec<usize> = (0..n).collect();
    let mut nearest: Vec<(f64, usize)> = (0..n).map(|a| nearest_after(&dist, &active, a)).collect();

    while active.len() > 1 {
        let mut a = active[0];
        for &c in &active[1..] {
            if nearest[c].0 < nearest[a].0 {
                a = c;
            }
        }
        let (a, b) = match nearest[a].1 {
            usize::MAX => (active[0], active[1]),
            b => (a, b),
        };

        for &c in &active {
            if c != a && c != b {
                let d = dist[a][c].max(dist[b][c]);
                dist[a][c] = d;
                dist[c][a] = d;
            }
        }
        let moved = std::mem::take(&mut members[b]);
        members[a].extend(moved);
        active.retain(|&c| c != b);

        for i in 0..active.len() {
            let x = active[i];
            if x == a || nearest[x].1 == a || nearest[x].1 == b {
                nearest[x] = nearest_after(&dist, &active, x);
            }
        }
    }

    std::mem::take(&mut members[active[0]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_stay_adjacent() {
        let rows = vec![
            vec![0.0, 0.0],
            vec![10.0, 10.0],
            vec![0.1, 0.0],
            vec![10.0, 10.2],
            vec![0.0, 0.2],
        ];
        let order = hierarchical_order(&rows);
        assert_eq!(order.len(), 5);
        let pos = |i: usize| order.iter().position(|&x| x == i).unwrap();
        let near: Vec<usize> = [0, 2, 4].iter().map(|&i| pos(i)).collect();
        let span = near.iter().max().unwrap() - near.iter().min().unwrap();
        assert_eq!(span, 2);
    }

    /// Full rescan of every active pair per merge
    fn rescan_order(rows: &[Vec<f64>]) -> Vec<usize> {
        let n = rows.len();
        let mut dist: Vec<Vec<f64>> = rows
            .iter()
            .map(|a| rows.iter().map(|b| euclidean(a, b)).collect())
            .collect();
        let mut members: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
        let mut active: Vec<usize> = (0..n).collect();
        while active.len() > 1 {
            let mut best = (f64::INFINITY, active[0], active[1]);
            for (ai, &a) in active.iter().enumerate() {
                for &b in &active[ai + 1..] {
                    if dist[a][b] < best.0 {
                        best = (dist[a][b], a, b);
                    }
                }
            }
            let (_, a, b) = best;
            for &c in &active {
                if c != a && c != b {
                    let d = dist[a][c].max(dist[b][c]);
                    dist[a][c] = d;
                    dist[c][a] = d;
                }
            }
            let moved = std::mem::take(&mut members[b]);
            members[a].extend(moved);
            active.retain(|&c| c != b);
        }
        members.swap_remove(active[0])
    }

    #[test]
    fn test_matches_full_rescan() {
        let rows: Vec<Vec<f64>> = (0..120)
            .map(|i| {
                let t = i as f64;
                vec![(t * 0.37).sin() * 3.0, (t * 0.11).cos() * 2.0, (i % 5) as f64]
            })
            .collect();
        assert_eq!(hierarchical_order(&rows), rescan_order(&rows));
    }

    #[test]
    fn test_small_inputs() {
        assert!(hierarchical_order(&[]).is_empty());
        assert_eq!(hierarchical_order(&[vec![1.0], vec![2.0]]), vec![0, 1]);
    }
}
