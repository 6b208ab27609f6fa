//! Elimination-forest partition across the depth dimension.
//!
//! With `depth = 2^(maxlvl-1)` layers, the supernodal elimination tree is cut
//! into `2 * depth - 1` sub-forests arranged as a complete binary hierarchy:
//! the `depth` leaf forests sit at level 0 (one per layer) and each pair of
//! siblings merges into a parent forest one level up, with the root forest at
//! the top. Tree ids follow binary-heap numbering: the root is 0, the
//! children of `t` are `2t + 1` and `2t + 2`.
//!
//! Layer `l` works on tree `2^(maxlvl-1-a) - 1 + (l >> a)` at level `a`, and
//! only participates at level `a` if `l` is a multiple of `2^a`.

/// Topological ordering of one sub-forest's nodes.
#[derive(Debug, Clone, Default)]
pub struct TreeTopo {
    /// Number of topological levels (leaves are level 0).
    pub num_levels: usize,
    /// Boundaries into the node list: level `t` spans
    /// `level_limits[t]..level_limits[t + 1]`.
    pub level_limits: Vec<usize>,
}

/// One sub-forest of the elimination forest.
#[derive(Debug, Clone, Default)]
pub struct SubForest {
    /// Supernode ids, ordered leaves-first by topological level.
    pub nodes: Vec<usize>,
    /// Topological structure over `nodes`.
    pub topo: TreeTopo,
}

impl SubForest {
    /// Build a forest over `nodes` using the supernodal elimination tree
    /// (`parent[k]` is the parent supernode of `k`, `None` at roots).
    ///
    /// Relies on supernode ids increasing toward the root, which holds for
    /// any postordered elimination tree.
    pub fn with_topology(mut nodes: Vec<usize>, parent: &[Option<usize>]) -> Self {
        nodes.sort_unstable();
        let mut level = std::collections::HashMap::new();
        for &n in &nodes {
            level.entry(n).or_insert(0usize);
            if let Some(p) = parent[n] {
                if nodes.binary_search(&p).is_ok() {
                    let ln = level[&n];
                    let lp = level.entry(p).or_insert(0);
                    *lp = (*lp).max(ln + 1);
                }
            }
        }
        let num_levels = nodes.iter().map(|n| level[n] + 1).max().unwrap_or(0);
        let mut ordered = nodes.clone();
        ordered.sort_by_key(|n| (level[n], *n));
        let mut level_limits = vec![0usize; num_levels + 1];
        for n in &ordered {
            level_limits[level[n] + 1] += 1;
        }
        for t in 0..num_levels {
            level_limits[t + 1] += level_limits[t];
        }
        Self { nodes: ordered, topo: TreeTopo { num_levels, level_limits } }
    }

    /// Nodes of topological level `t`.
    #[inline]
    pub fn level_nodes(&self, t: usize) -> &[usize] {
        &self.nodes[self.topo.level_limits[t]..self.topo.level_limits[t + 1]]
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }
}

/// Binary-heap id of the tree that layer `layer` works on at hierarchy level
/// `level`, for a hierarchy of `max_level` levels.
#[inline]
pub fn tree_id(level: usize, layer: usize, max_level: usize) -> usize {
    (1usize << (max_level - 1 - level)) - 1 + (layer >> level)
}

/// Parent tree id in binary-heap numbering (`None` at the root).
#[inline]
pub fn tree_parent(tree: usize) -> Option<usize> {
    if tree == 0 { None } else { Some((tree + 1) / 2 - 1) }
}

/// The full forest partition, identical on every process.
#[derive(Debug, Clone, Default)]
pub struct ForestPartition {
    /// Sub-forests indexed by binary-heap tree id (`2 * depth - 1` entries);
    /// `None` marks an empty forest.
    pub forests: Vec<Option<SubForest>>,
    /// Tree containing each supernode (`None` if the supernode is absent
    /// from the partition).
    pub supernode_tree: Vec<Option<usize>>,
}

impl ForestPartition {
    /// Build the partition from per-supernode tree assignments.
    pub fn from_assignment(
        supernode_tree: Vec<Option<usize>>,
        num_trees: usize,
        parent: &[Option<usize>],
    ) -> Self {
        let mut members: Vec<Vec<usize>> = vec![Vec::new(); num_trees];
        for (k, t) in supernode_tree.iter().enumerate() {
            if let Some(t) = t {
                members[*t].push(k);
            }
        }
        let forests = members
            .into_iter()
            .map(|nodes| {
                if nodes.is_empty() {
                    None
                } else {
                    Some(SubForest::with_topology(nodes, parent))
                }
            })
            .collect();
        Self { forests, supernode_tree }
    }

    /// Partition for a flat grid (`depth == 1`): a single tree holding every
    /// supernode.
    pub fn single_tree(nsupers: usize, parent: &[Option<usize>]) -> Self {
        Self::from_assignment(vec![Some(0); nsupers], 1, parent)
    }

    /// Tree id layer `layer` works on at each hierarchy level.
    pub fn my_tree_ids(&self, layer: usize, max_level: usize) -> Vec<usize> {
        (0..max_level).map(|a| tree_id(a, layer, max_level)).collect()
    }

    /// Per hierarchy level: true if layer `layer` sits this level out.
    pub fn my_idle_levels(&self, layer: usize, max_level: usize) -> Vec<bool> {
        (0..max_level).map(|a| layer & ((1usize << a) - 1) != 0).collect()
    }

    /// The forest for tree `t`, if non-empty.
    #[inline]
    pub fn forest(&self, t: usize) -> Option<&SubForest> {
        self.forests.get(t).and_then(|f| f.as_ref())
    }
}
