use anyhow::{bail, Error};
use itertools::Itertools;
use kodama::{linkage, Dendrogram, Float as KodamaFloat, Method, Step};
use ndarray::{Array2, ArrayView1};
use num_traits::Float;
use petgraph::unionfind::UnionFind;
use std::collections::HashMap;
use std::str::FromStr;

/// Dissimilarity between two observation vectors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DistanceMetric {
    Euclidean,
    /// One minus the cosine of the angle between the vectors. A zero-norm
    /// vector is at distance one from everything.
    Cosine,
}

impl DistanceMetric {
    pub fn apply<T: Float>(self, x1: &ArrayView1<T>, x2: &ArrayView1<T>) -> T {
        match self {
            DistanceMetric::Euclidean => {
                let mut dx = x2 - x1;
                dx.map_inplace(|v| {
                    *v = (*v) * (*v);
                });
                dx.sum().sqrt()
            }
            DistanceMetric::Cosine => {
                let mut dot = T::zero();
                let mut norm1 = T::zero();
                let mut norm2 = T::zero();
                for (&a, &b) in x1.iter().zip(x2.iter()) {
                    dot = dot + a * b;
                    norm1 = norm1 + a * a;
                    norm2 = norm2 + b * b;
                }
                if norm1 == T::zero() || norm2 == T::zero() {
                    return T::one();
                }
                // rounding can push the ratio past one for near-parallel
                // vectors; distances stay non-negative
                (T::one() - dot / (norm1.sqrt() * norm2.sqrt())).max(T::zero())
            }
        }
    }
}

#[derive(Clone, Copy)]
pub enum ClusterDirection {
    // Treat each row as an observation
    Rows,
    // Treat each column as an observation
    Columns,
}

impl ClusterDirection {
    pub fn n<F: Float>(self, array: &Array2<F>) -> usize {
        match self {
            ClusterDirection::Rows => array.nrows(),
            ClusterDirection::Columns => array.ncols(),
        }
    }
    pub fn get<F: Float>(self, array: &Array2<F>, index: usize) -> ArrayView1<F> {
        match self {
            ClusterDirection::Rows => array.row(index),
            ClusterDirection::Columns => array.column(index),
        }
    }
}

/// Agglomeration rule used when two clusters merge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkageMethod {
    Single,
    Complete,
    Average,
    Ward,
}

impl LinkageMethod {
    fn to_kodama(self) -> Method {
        match self {
            LinkageMethod::Single => Method::Single,
            LinkageMethod::Complete => Method::Complete,
            LinkageMethod::Average => Method::Average,
            LinkageMethod::Ward => Method::Ward,
        }
    }
}

impl FromStr for LinkageMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let res = match s {
            "single" => LinkageMethod::Single,
            "complete" => LinkageMethod::Complete,
            "average" => LinkageMethod::Average,
            "ward" => LinkageMethod::Ward,
            v => bail!("Unknown linkage method: {}", v),
        };
        Ok(res)
    }
}

/// Relabel vector of cluster labelling so that cluster names
/// start with 1 and are consecutive integers.
/// For example, [5, 3, 5, 5, 10, 15, 10, 15] maps to
/// [1, 2, 1, 1, 3, 4, 3, 4]
fn relabel_vector(input: &[usize]) -> Vec<usize> {
    let mapping: HashMap<_, _> = input
        .iter()
        .unique()
        .enumerate()
        .map(|(i, v)| (v, i + 1))
        .collect();
    input.iter().map(|x| mapping[x]).collect_vec()
}

pub struct HierarchicalCluster<F: Float> {
    dendrogram: Dendrogram<F>,
}

impl<F: Float + KodamaFloat> HierarchicalCluster<F> {
    pub fn new(
        array: &Array2<F>,
        metric: DistanceMetric,
        method: LinkageMethod,
        direction: ClusterDirection,
    ) -> Self {
        let n = direction.n(array);
        if n < 2 {
            panic!("Need at least two elements to do hierarchical clustering");
        }
        let mut condensed_dissimilarity = vec![];

        for i in 0..n {
            let x_i = direction.get(array, i);
            for j in i + 1..n {
                let x_j = direction.get(array, j);
                condensed_dissimilarity.push(metric.apply(&x_i, &x_j));
            }
        }

        let dendrogram = linkage(&mut condensed_dissimilarity, n, method.to_kodama());
        assert_eq!(dendrogram.len(), n - 1);
        HierarchicalCluster { dendrogram }
    }

    pub fn observations(&self) -> usize {
        self.dendrogram.observations()
    }

    /// Merge dissimilarities, one per step, in merge order.
    pub fn heights(&self) -> Vec<F> {
        self.dendrogram
            .steps()
            .iter()
            .map(|s| s.dissimilarity)
            .collect()
    }

    /// Flat clusters from cutting the dendrogram into exactly
    /// `num_clusters` groups: the first `n - num_clusters` merges are
    /// applied in dissimilarity order, so the requested count is hit even
    /// when merge heights tie. Labels start at 1 and are consecutive,
    /// numbered by first appearance.
    pub fn cut(&self, num_clusters: usize) -> Vec<usize> {
        let num_points = self.dendrogram.observations();
        if num_clusters <= 1 {
            return vec![1; num_points];
        }
        if num_clusters >= num_points {
            return (1..=num_points).collect();
        }
        let mut union_find_clsts = UnionFind::new(num_points);
        let mut new_clusters_to_old_map = HashMap::new();
        for (index, stp) in self
            .dendrogram
            .steps()
            .iter()
            .enumerate()
            .take(num_points - num_clusters)
        {
            let new_cluster1 = *new_clusters_to_old_map
                .get(&stp.cluster1)
                .unwrap_or(&stp.cluster1);
            let new_cluster2 = *new_clusters_to_old_map
                .get(&stp.cluster2)
                .unwrap_or(&stp.cluster2);
            union_find_clsts.union(new_cluster1, new_cluster2);
            new_clusters_to_old_map.insert(num_points + index, union_find_clsts.find(new_cluster1));
        }
        relabel_vector(&union_find_clsts.into_labeling())
    }

    /// Left-to-right dendrogram leaf order, keeping the lower-numbered
    /// cluster of every merge on the left.
    ///
    /// Returns
    /// - x : A vector with length equal to the number of observations.
    ///       x[i] = j implies that observation "j" is present at index "i"
    ///       when reading the leaves from left to right
    pub fn leaves(&self) -> Vec<usize> {
        let n = self.dendrogram.observations();
        let steps = self.dendrogram.steps();
        let mut order = Vec::with_capacity(n);
        let mut stack = vec![2 * n - 2];
        while let Some(node) = stack.pop() {
            if node < n {
                order.push(node);
            } else {
                let Step {
                    cluster1, cluster2, ..
                } = &steps[node - n];
                // cluster1 < cluster2 for every step; visit it first
                stack.push(*cluster2);
                stack.push(*cluster1);
            }
        }
        order
    }
}
