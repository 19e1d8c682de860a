use std::fmt;
use std::io::Write;
use std::str::FromStr;

use anyhow::Result;

use crate::discretiser::EpochPt;
use crate::error::{DltError, DltResult};
use crate::io::newick::{NewickNode, parse_newick, parse_prime_tags, write_newick};
use crate::tree::{HostTree, RootedTree};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexType {
    Leaf,
    Speciation,
    Duplication,
    Transfer,
}

impl fmt::Display for VertexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VertexType::Leaf => "Leaf",
            VertexType::Speciation => "Speciation",
            VertexType::Duplication => "Duplication",
            VertexType::Transfer => "Transfer",
        };
        f.write_str(s)
    }
}

impl FromStr for VertexType {
    type Err = DltError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Leaf" => Ok(VertexType::Leaf),
            "Speciation" => Ok(VertexType::Speciation),
            "Duplication" => Ok(VertexType::Duplication),
            "Transfer" => Ok(VertexType::Transfer),
            other => Err(DltError::Newick {
                pos: 0,
                msg: format!("unknown vertex type {other:?}"),
            }),
        }
    }
}

/// Donor and recipient arc indices of a transfer, both within the epoch of
/// the transfer point. `special` marks a duplication relabelled as a
/// transfer because it left its parent's host lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferLineage {
    pub from: usize,
    pub to: usize,
    pub special: bool,
}

impl fmt::Display for TransferLineage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = if self.special { 1 } else { -1 };
        write!(f, "({},{},{})", self.from, self.to, flag)
    }
}

/// Where and when one guest vertex sits in a realisation.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedVertex {
    pub kind: VertexType,
    pub pt: EpochPt,
    /// Arc index within the epoch of `pt`.
    pub arc: usize,
    pub n_arcs: usize,
    /// Host vertex at the head of the arc.
    pub host_vertex: usize,
    pub abs_time: f64,
    /// Time from the parent placement (or the stem tip) down to this one.
    pub arc_time: f64,
    pub transfer: Option<TransferLineage>,
}

impl PlacedVertex {
    fn annotation(&self) -> String {
        let mut s = format!("&&PRIME VERTEXTYPE={}", self.kind);
        if let Some(tr) = self.transfer {
            s.push_str(&format!(" FROMTOLINEAGE={tr}"));
        }
        s.push_str(&format!(
            " SPECIES_EDGE=({},{}) DISCPT={}",
            self.arc, self.n_arcs, self.pt
        ));
        s
    }
}

/// One dated embedding of the guest tree in the discretised host tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Realisation {
    tree: RootedTree,
    vertices: Vec<PlacedVertex>,
}

impl Realisation {
    pub fn new(tree: RootedTree, vertices: Vec<PlacedVertex>) -> Self {
        debug_assert_eq!(tree.n_vertices(), vertices.len());
        Self { tree, vertices }
    }

    pub fn tree(&self) -> &RootedTree {
        &self.tree
    }

    pub fn vertex(&self, u: usize) -> &PlacedVertex {
        &self.vertices[u]
    }

    pub fn vertices(&self) -> &[PlacedVertex] {
        &self.vertices
    }

    pub fn count(&self, kind: VertexType) -> usize {
        self.vertices.iter().filter(|v| v.kind == kind).count()
    }
}

impl fmt::Display for Realisation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let node = self.tree.to_newick_node(|u, node| {
            let v = &self.vertices[u];
            node.length = Some(v.arc_time);
            node.meta = Some(v.annotation());
        });
        f.write_str(&write_newick(&node))
    }
}

/// A vertex read back from an annotated realisation string.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedVertex {
    pub kind: VertexType,
    pub pt: EpochPt,
    pub species_edge: Option<(usize, usize)>,
    pub transfer: Option<TransferLineage>,
    pub arc_time: Option<f64>,
}

fn tag_error(msg: String) -> DltError {
    DltError::Newick { pos: 0, msg }
}

fn parse_tuple<T: FromStr>(text: &str) -> Option<Vec<T>> {
    let inner = text.trim().strip_prefix('(')?.strip_suffix(')')?;
    inner.split(',').map(|x| x.trim().parse().ok()).collect()
}

fn annotated(node: &NewickNode) -> DltResult<AnnotatedVertex> {
    let label = node.name.as_deref().unwrap_or("<internal>");
    let meta = node
        .meta
        .as_deref()
        .ok_or_else(|| tag_error(format!("vertex {label} has no annotation")))?;
    let tags = parse_prime_tags(meta);
    let kind: VertexType = tags
        .get("VERTEXTYPE")
        .ok_or_else(|| tag_error(format!("vertex {label} has no VERTEXTYPE")))?
        .parse()?;
    let pt = match tags.get("DISCPT").map(|s| parse_tuple::<usize>(s)) {
        Some(Some(v)) if v.len() == 2 => EpochPt::new(v[0], v[1]),
        _ => return Err(tag_error(format!("vertex {label} has a bad DISCPT"))),
    };
    let species_edge = match tags.get("SPECIES_EDGE").map(|s| parse_tuple::<usize>(s)) {
        None => None,
        Some(Some(v)) if v.len() == 2 => Some((v[0], v[1])),
        Some(_) => return Err(tag_error(format!("vertex {label} has a bad SPECIES_EDGE"))),
    };
    let transfer = match tags.get("FROMTOLINEAGE").map(|s| parse_tuple::<i64>(s)) {
        None => None,
        Some(Some(v)) if v.len() == 3 && v[0] >= 0 && v[1] >= 0 => Some(TransferLineage {
            from: v[0] as usize,
            to: v[1] as usize,
            special: v[2] == 1,
        }),
        Some(_) => return Err(tag_error(format!("vertex {label} has a bad FROMTOLINEAGE"))),
    };
    Ok(AnnotatedVertex {
        kind,
        pt,
        species_edge,
        transfer,
        arc_time: node.length,
    })
}

// Same numbering as `RootedTree::from_newick_node`.
fn number_nodes<'a>(
    node: &'a NewickNode,
    slots: &mut [Option<&'a NewickNode>],
    next_leaf: &mut usize,
    next_internal: &mut usize,
) {
    for c in &node.children {
        number_nodes(c, slots, next_leaf, next_internal);
    }
    let counter = if node.is_leaf() { next_leaf } else { next_internal };
    slots[*counter] = Some(node);
    *counter += 1;
}

/// Reads a realisation string back into a tree and per-vertex annotations.
pub fn parse_realisation(text: &str) -> DltResult<(RootedTree, Vec<AnnotatedVertex>)> {
    let root = parse_newick(text)?;
    let (tree, _) = RootedTree::from_newick_node(&root)?;
    let mut slots = vec![None; tree.n_vertices()];
    let mut next_leaf = 0;
    let mut next_internal = tree.n_leaves();
    number_nodes(&root, &mut slots, &mut next_leaf, &mut next_internal);
    let vertices = slots
        .into_iter()
        .map(|n| n.map_or_else(|| Err(tag_error("missing vertex".into())), annotated))
        .collect::<DltResult<Vec<_>>>()?;
    Ok((tree, vertices))
}

/// Tab separated realisation records, preceded by the host tree they were
/// sampled in.
pub struct RealisationWriter<W: Write> {
    out: W,
}

impl<W: Write> RealisationWriter<W> {
    pub fn new(mut out: W, host: &HostTree, with_header: bool) -> Result<Self> {
        writeln!(out, "# Host tree: {}", host.to_newick())?;
        if with_header {
            writeln!(out, "RealisationID\tSubsample\tRealisation")?;
        }
        Ok(Self { out })
    }

    pub fn write(&mut self, id: &str, subsample: usize, real: &Realisation) -> Result<()> {
        writeln!(self.out, "{id}\t{subsample}\t{real}")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}
