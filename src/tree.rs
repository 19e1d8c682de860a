use crate::error::{DltError, DltResult};
use crate::io::newick::{NewickNode, parse_newick, write_newick};

/// Rooted binary tree stored as index arrays. Leaves are numbered
/// `0..n_leaves` from left to right, internal vertices follow in post-order,
/// so the root always has the largest index.
#[derive(Debug, Clone, PartialEq)]
pub struct RootedTree {
    names: Vec<Option<String>>,
    parents: Vec<Option<usize>>,
    children: Vec<Option<(usize, usize)>>,
    root: usize,
    n_leaves: usize,
}

impl RootedTree {
    /// Builds the tree and returns it with the branch length of every vertex.
    pub fn from_newick_node(node: &NewickNode) -> DltResult<(Self, Vec<Option<f64>>)> {
        let n_leaves = node.n_leaves();
        let mut b = Builder {
            names: Vec::new(),
            parents: Vec::new(),
            children: Vec::new(),
            lengths: Vec::new(),
            next_leaf: 0,
            next_internal: n_leaves,
        };
        let n_vertices = 2 * n_leaves - 1;
        b.names.resize(n_vertices, None);
        b.parents.resize(n_vertices, None);
        b.children.resize(n_vertices, None);
        b.lengths.resize(n_vertices, None);
        let root = b.visit(node)?;
        Ok((
            Self {
                names: b.names,
                parents: b.parents,
                children: b.children,
                root,
                n_leaves,
            },
            b.lengths,
        ))
    }

    pub fn n_vertices(&self) -> usize {
        self.parents.len()
    }

    pub fn n_leaves(&self) -> usize {
        self.n_leaves
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn is_leaf(&self, u: usize) -> bool {
        self.children[u].is_none()
    }

    pub fn parent(&self, u: usize) -> Option<usize> {
        self.parents[u]
    }

    pub fn children(&self, u: usize) -> Option<(usize, usize)> {
        self.children[u]
    }

    pub fn sibling(&self, u: usize) -> Option<usize> {
        let (l, r) = self.children(self.parent(u)?)?;
        Some(if l == u { r } else { l })
    }

    pub fn name(&self, u: usize) -> Option<&str> {
        self.names[u].as_deref()
    }

    pub fn vertex_by_name(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n.as_deref() == Some(name))
    }

    /// Leaves in left-to-right order.
    pub fn leaves(&self) -> Vec<usize> {
        self.post_order()
            .into_iter()
            .filter(|&u| self.is_leaf(u))
            .collect()
    }

    /// Left subtree, right subtree, then the vertex itself.
    pub fn post_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.n_vertices());
        let mut stack = vec![(self.root, false)];
        while let Some((u, expanded)) = stack.pop() {
            match self.children[u] {
                Some((l, r)) if !expanded => {
                    stack.push((u, true));
                    stack.push((r, false));
                    stack.push((l, false));
                }
                _ => order.push(u),
            }
        }
        order
    }

    /// Every vertex before its children.
    pub fn pre_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.n_vertices());
        let mut stack = vec![self.root];
        while let Some(u) = stack.pop() {
            order.push(u);
            if let Some((l, r)) = self.children[u] {
                stack.push(r);
                stack.push(l);
            }
        }
        order
    }

    /// True if `a` lies on the path from `b` to the root, `b` included.
    pub fn is_ancestor_or_self(&self, a: usize, b: usize) -> bool {
        let mut x = Some(b);
        while let Some(v) = x {
            if v == a {
                return true;
            }
            x = self.parents[v];
        }
        false
    }

    pub fn depth(&self, u: usize) -> usize {
        let mut d = 0;
        let mut x = u;
        while let Some(p) = self.parents[x] {
            d += 1;
            x = p;
        }
        d
    }

    /// Lowest common ancestor, or `None` if either index is out of range.
    pub fn lca(&self, a: usize, b: usize) -> Option<usize> {
        let n = self.n_vertices();
        if a >= n || b >= n {
            return None;
        }
        let mut on_path = vec![false; n];
        let mut x = Some(a);
        while let Some(v) = x {
            on_path[v] = true;
            x = self.parents[v];
        }
        let mut x = Some(b);
        while let Some(v) = x {
            if on_path[v] {
                return Some(v);
            }
            x = self.parents[v];
        }
        None
    }

    /// The given vertices plus all their ancestors, children before parents.
    pub fn spanning_root_subtree(&self, vertices: &[usize]) -> Vec<usize> {
        let mut marked = vec![false; self.n_vertices()];
        for &v in vertices {
            let mut x = Some(v);
            while let Some(u) = x {
                if marked[u] {
                    break;
                }
                marked[u] = true;
                x = self.parents[u];
            }
        }
        self.post_order().into_iter().filter(|&u| marked[u]).collect()
    }

    /// Rebuilds a Newick node tree, with `decorate` filling in length and meta.
    pub fn to_newick_node<F>(&self, mut decorate: F) -> NewickNode
    where
        F: FnMut(usize, &mut NewickNode),
    {
        let mut built: Vec<Option<NewickNode>> = vec![None; self.n_vertices()];
        for u in self.post_order() {
            let mut node = NewickNode {
                name: self.names[u].clone(),
                ..NewickNode::default()
            };
            if let Some((l, r)) = self.children[u] {
                node.children = vec![
                    built[l].take().unwrap_or_default(),
                    built[r].take().unwrap_or_default(),
                ];
            }
            decorate(u, &mut node);
            built[u] = Some(node);
        }
        built[self.root].take().unwrap_or_default()
    }
}

struct Builder {
    names: Vec<Option<String>>,
    parents: Vec<Option<usize>>,
    children: Vec<Option<(usize, usize)>>,
    lengths: Vec<Option<f64>>,
    next_leaf: usize,
    next_internal: usize,
}

impl Builder {
    fn visit(&mut self, node: &NewickNode) -> DltResult<usize> {
        let id = match node.children.len() {
            0 => {
                let id = self.next_leaf;
                self.next_leaf += 1;
                id
            }
            2 => {
                let l = self.visit(&node.children[0])?;
                let r = self.visit(&node.children[1])?;
                let id = self.next_internal;
                self.next_internal += 1;
                self.parents[l] = Some(id);
                self.parents[r] = Some(id);
                self.children[id] = Some((l, r));
                id
            }
            n => {
                return Err(DltError::NonBifurcating {
                    vertex: node.name.clone().unwrap_or_else(|| "<internal>".to_string()),
                    n_children: n,
                });
            }
        };
        self.names[id] = node.name.clone();
        self.lengths[id] = node.length;
        Ok(id)
    }
}

const ULTRAMETRIC_REL_TOL: f64 = 1e-6;

/// Dated, ultrametric host tree with a stem arc above the root.
#[derive(Debug, Clone, PartialEq)]
pub struct HostTree {
    tree: RootedTree,
    times: Vec<f64>,
    arc_times: Vec<f64>,
}

impl HostTree {
    /// Reads times from branch lengths. The root's branch length is the stem.
    pub fn from_newick(text: &str) -> DltResult<Self> {
        let node = parse_newick(text)?;
        let (tree, lengths) = RootedTree::from_newick_node(&node)?;
        Self::from_branch_lengths(tree, &lengths)
    }

    pub fn from_branch_lengths(tree: RootedTree, lengths: &[Option<f64>]) -> DltResult<Self> {
        let stem = lengths[tree.root()].ok_or(DltError::MissingStemTime(None))?;
        let mut depth = vec![0.0; tree.n_vertices()];
        for u in tree.pre_order() {
            if let Some(p) = tree.parent(u) {
                let len = lengths[u].unwrap_or(0.0);
                depth[u] = depth[p] + len;
            }
        }
        let height = tree
            .leaves()
            .into_iter()
            .map(|l| depth[l])
            .fold(0.0_f64, f64::max);
        let times: Vec<f64> = depth.iter().map(|d| height - d).collect();
        Self::with_times(tree, times, stem)
    }

    /// Validates absolute vertex times (leaves at 0) and a positive stem.
    pub fn with_times(tree: RootedTree, mut times: Vec<f64>, stem_time: f64) -> DltResult<Self> {
        if times.len() != tree.n_vertices() {
            return Err(DltError::VertexCountMismatch {
                expected: tree.n_vertices(),
                found: times.len(),
            });
        }
        if !(stem_time > 0.0 && stem_time.is_finite()) {
            return Err(DltError::MissingStemTime(Some(stem_time)));
        }
        let scale = times[tree.root()].abs().max(1.0);
        for l in tree.leaves() {
            if times[l].abs() > ULTRAMETRIC_REL_TOL * scale {
                return Err(DltError::NotUltrametric {
                    leaf: vertex_label(&tree, l),
                    time: times[l],
                });
            }
            times[l] = 0.0;
        }
        let mut arc_times = vec![0.0; tree.n_vertices()];
        for u in 0..tree.n_vertices() {
            arc_times[u] = match tree.parent(u) {
                Some(p) => times[p] - times[u],
                None => stem_time,
            };
            if !(arc_times[u] > 0.0) {
                return Err(DltError::NonPositiveArc(vertex_label(&tree, u)));
            }
        }
        Ok(Self {
            tree,
            times,
            arc_times,
        })
    }

    pub fn tree(&self) -> &RootedTree {
        &self.tree
    }

    pub fn time(&self, x: usize) -> f64 {
        self.times[x]
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Length of the arc above `x`; the stem for the root.
    pub fn arc_time(&self, x: usize) -> f64 {
        self.arc_times[x]
    }

    pub fn root_time(&self) -> f64 {
        self.times[self.tree.root()]
    }

    pub fn stem_time(&self) -> f64 {
        self.arc_times[self.tree.root()]
    }

    pub fn top_time(&self) -> f64 {
        self.root_time() + self.stem_time()
    }

    pub fn to_newick(&self) -> String {
        let node = self.tree.to_newick_node(|u, n| n.length = Some(self.arc_times[u]));
        write_newick(&node)
    }
}

fn vertex_label(tree: &RootedTree, u: usize) -> String {
    tree.name(u)
        .map(str::to_string)
        .unwrap_or_else(|| format!("#{u}"))
}

/// Guest (gene) tree with a branch length above every vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct GuestTree {
    tree: RootedTree,
    lengths: Vec<f64>,
}

impl GuestTree {
    pub fn new(tree: RootedTree, lengths: Vec<f64>) -> DltResult<Self> {
        if lengths.len() != tree.n_vertices() {
            return Err(DltError::VertexCountMismatch {
                expected: tree.n_vertices(),
                found: lengths.len(),
            });
        }
        Ok(Self { tree, lengths })
    }

    /// Missing lengths, including the root's, are read as 0.
    pub fn from_newick(text: &str) -> DltResult<Self> {
        let node = parse_newick(text)?;
        let (tree, lengths) = RootedTree::from_newick_node(&node)?;
        let lengths = lengths.into_iter().map(|l| l.unwrap_or(0.0)).collect();
        Self::new(tree, lengths)
    }

    pub fn tree(&self) -> &RootedTree {
        &self.tree
    }

    pub fn length(&self, u: usize) -> f64 {
        self.lengths[u]
    }

    pub fn lengths(&self) -> &[f64] {
        &self.lengths
    }

    pub fn set_length(&mut self, u: usize, length: f64) {
        self.lengths[u] = length;
    }

    pub fn to_newick(&self) -> String {
        let node = self.tree.to_newick_node(|u, n| n.length = Some(self.lengths[u]));
        write_newick(&node)
    }
}
