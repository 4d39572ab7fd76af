use crate::dim::Dim;
use crate::engines::evaluation::compile::CompiledExpr;
use crate::engines::evaluation::scoring::CoefCorrection;
use crate::error::{Result, SymregError};
use crate::symbols::node::{NodeDef, SymbolId};
use crate::symbols::registry::SymbolSet;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::{Arc, OnceLock};

/// One candidate expression: a flattened sequence of symbol references in
/// prefix order.
///
/// The sequence always satisfies arity closure: scanning left to right with
/// an open-slot counter (seeded at 1, each node adds `arity - 1`) reaches
/// zero exactly at the end, and every index roots a sub-range with the same
/// property. Construction and every structural edit enforce this.
///
/// The canonical machine rendering is cached after the first request and
/// dropped on every structural edit, together with all evaluation
/// annotations.
#[derive(Debug, Clone)]
pub struct ExprTree {
    nodes: Vec<SymbolId>,
    canonical: OnceLock<String>,
    ann: Annotations,
}

/// Evaluation results cached on a tree. Any structural edit resets the
/// whole block; stale caches would silently mis-score an edited tree.
#[derive(Debug, Clone, Default)]
struct Annotations {
    p_name: Option<String>,
    y_dim: Dim,
    pre_y: Option<Arc<Vec<f64>>>,
    expr: Option<CompiledExpr>,
    dim_score: f64,
    coef: Option<CoefCorrection>,
}

impl ExprTree {
    pub fn new(nodes: Vec<SymbolId>, set: &SymbolSet) -> Result<Self> {
        Self::check_closure(&nodes, set)?;
        Ok(Self {
            nodes,
            canonical: OnceLock::new(),
            ann: Annotations::default(),
        })
    }

    fn check_closure(nodes: &[SymbolId], set: &SymbolSet) -> Result<()> {
        if nodes.is_empty() {
            return Err(SymregError::Structure("empty expression".to_string()));
        }
        let mut open: i64 = 1;
        for (i, id) in nodes.iter().enumerate() {
            let def = set.get(*id).ok_or_else(|| {
                SymregError::Structure(format!(
                    "symbol id {} at position {i} is not in the registry",
                    id.index()
                ))
            })?;
            open += def.arity() as i64 - 1;
            if open == 0 && i + 1 != nodes.len() {
                return Err(SymregError::Structure(format!(
                    "expression closes after {} of {} nodes",
                    i + 1,
                    nodes.len()
                )));
            }
        }
        if open != 0 {
            return Err(SymregError::Structure(format!(
                "expression leaves {open} argument slot(s) unfilled"
            )));
        }
        Ok(())
    }

    /// Arity balance of a node sequence: `sum(arity) - len`. A complete
    /// subtree balances to -1; replacements must match the range they
    /// replace.
    fn balance(nodes: &[SymbolId], set: &SymbolSet) -> Result<i64> {
        let mut total: i64 = 0;
        for id in nodes {
            let def = set.get(*id).ok_or_else(|| {
                SymregError::Structure(format!(
                    "symbol id {} is not in the registry",
                    id.index()
                ))
            })?;
            total += def.arity() as i64 - 1;
        }
        Ok(total)
    }

    pub fn nodes(&self) -> &[SymbolId] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> SymbolId {
        self.nodes[0]
    }

    /// Range of the subtree rooted at `begin`: the smallest forward scan
    /// whose open-slot counter returns to zero.
    pub fn subtree(&self, begin: usize, set: &SymbolSet) -> Result<Range<usize>> {
        if begin >= self.nodes.len() {
            return Err(SymregError::Structure(format!(
                "subtree root {begin} is out of bounds (len {})",
                self.nodes.len()
            )));
        }
        let mut open = set.def(self.nodes[begin]).arity() as i64;
        let mut end = begin + 1;
        while open > 0 {
            if end >= self.nodes.len() {
                return Err(SymregError::Structure(format!(
                    "subtree at {begin} never closes"
                )));
            }
            open += set.def(self.nodes[end]).arity() as i64 - 1;
            end += 1;
        }
        Ok(begin..end)
    }

    /// Replace a sub-range with new nodes. Rejected unless the replacement's
    /// arity balance equals the replaced range's; the tree is untouched on
    /// error. Invalidates the canonical string and all cached annotations.
    pub fn replace_range(
        &mut self,
        range: Range<usize>,
        replacement: &[SymbolId],
        set: &SymbolSet,
    ) -> Result<()> {
        if range.start >= range.end || range.end > self.nodes.len() {
            return Err(SymregError::Structure(format!(
                "replacement range {}..{} is invalid for a tree of {} nodes",
                range.start,
                range.end,
                self.nodes.len()
            )));
        }
        if replacement.is_empty() {
            return Err(SymregError::Structure(
                "replacement sequence is empty".to_string(),
            ));
        }
        let old = Self::balance(&self.nodes[range.clone()], set)?;
        let new = Self::balance(replacement, set)?;
        if old != new {
            return Err(SymregError::ArityMismatch(format!(
                "replacement balance {new} does not match replaced range balance {old}"
            )));
        }
        self.nodes.splice(range, replacement.iter().copied());
        self.invalidate();
        Ok(())
    }

    /// Replace a single node with one of identical arity.
    pub fn set_node(&mut self, index: usize, id: SymbolId, set: &SymbolSet) -> Result<()> {
        if index >= self.nodes.len() {
            return Err(SymregError::Structure(format!(
                "node index {index} is out of bounds (len {})",
                self.nodes.len()
            )));
        }
        let new_def = set.get(id).ok_or_else(|| {
            SymregError::Structure(format!(
                "symbol id {} is not in the registry",
                id.index()
            ))
        })?;
        let old_arity = set.def(self.nodes[index]).arity();
        if new_def.arity() != old_arity {
            return Err(SymregError::ArityMismatch(format!(
                "cannot replace an arity-{old_arity} node with '{}' (arity {})",
                new_def.name(),
                new_def.arity()
            )));
        }
        self.nodes[index] = id;
        self.invalidate();
        Ok(())
    }

    fn invalidate(&mut self) {
        self.canonical = OnceLock::new();
        self.ann = Annotations::default();
    }

    /// Depth of the deepest node, root at 0.
    pub fn height(&self, set: &SymbolSet) -> usize {
        let mut stack = vec![0usize];
        let mut max_depth = 0;
        for id in &self.nodes {
            let depth = stack.pop().unwrap_or(0);
            max_depth = max_depth.max(depth);
            let arity = set.def(*id).arity();
            stack.extend(std::iter::repeat(depth + 1).take(arity));
        }
        max_depth
    }

    /// Single left-to-right reduction with an explicit stack of
    /// `(node, collected args)` frames. Pass-through structural markers
    /// contribute nothing. Total for any structurally valid tree.
    fn render(&self, set: &SymbolSet, long: bool) -> String {
        let mut stack: Vec<(SymbolId, Vec<String>)> = Vec::new();
        let mut out = String::new();
        for id in &self.nodes {
            let def = set.def(*id);
            if def.pass_through() {
                continue;
            }
            stack.push((*id, Vec::with_capacity(def.arity())));
            loop {
                let filled = match stack.last() {
                    Some((top, args)) => args.len() == set.def(*top).arity(),
                    None => false,
                };
                if !filled {
                    break;
                }
                let Some((top, args)) = stack.pop() else {
                    break;
                };
                let def = set.def(top);
                let rendered = if long {
                    def.format_long(&args)
                } else {
                    def.format(&args)
                };
                match stack.last_mut() {
                    Some((_, parent_args)) => parent_args.push(rendered),
                    None => {
                        out = rendered;
                        break;
                    }
                }
            }
        }
        out
    }

    /// Compact evaluable rendering, e.g. `Add(x0, x0)`.
    pub fn render_machine(&self, set: &SymbolSet) -> String {
        self.render(set, false)
    }

    /// Human-readable rendering using long terminal names.
    pub fn render_display(&self, set: &SymbolSet) -> String {
        self.render(set, true)
    }

    /// Cached canonical (machine) rendering; computed once per structure.
    pub fn canonical(&self, set: &SymbolSet) -> &str {
        self.canonical.get_or_init(|| self.render(set, false))
    }

    /// Trees are equal iff their canonical renderings are equal. Distinct
    /// sequences that render identically are intentionally identified.
    pub fn equals(&self, other: &ExprTree, set: &SymbolSet) -> bool {
        self.canonical(set) == other.canonical(set)
    }

    /// Hashable dedup key over the canonical rendering.
    pub fn signature(&self, set: &SymbolSet) -> TreeSignature {
        TreeSignature(self.canonical(set).to_string())
    }

    pub fn terminals<'a>(&self, set: &'a SymbolSet) -> Vec<&'a NodeDef> {
        self.nodes
            .iter()
            .map(|id| set.def(*id))
            .filter(|def| def.arity() == 0)
            .collect()
    }

    pub fn terminal_positions(&self, set: &SymbolSet) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, id)| set.def(**id).arity() == 0)
            .map(|(i, _)| i)
            .collect()
    }

    /// Minimal cross-worker payload: symbol ids plus the canonical string,
    /// no cached data.
    pub fn capsule(&self, set: &SymbolSet) -> Capsule {
        Capsule {
            nodes: self.nodes.clone(),
            canonical: self.canonical(set).to_string(),
        }
    }

    // --- Cached annotations ---

    pub fn promoted_name(&self) -> Option<&str> {
        self.ann.p_name.as_deref()
    }

    pub(crate) fn set_promoted_name(&mut self, name: String) {
        self.ann.p_name = Some(name);
    }

    pub fn y_dim(&self) -> &Dim {
        &self.ann.y_dim
    }

    pub fn pre_y(&self) -> Option<&Arc<Vec<f64>>> {
        self.ann.pre_y.as_ref()
    }

    pub fn compiled(&self) -> Option<&CompiledExpr> {
        self.ann.expr.as_ref()
    }

    pub fn dim_score(&self) -> f64 {
        self.ann.dim_score
    }

    pub fn coef(&self) -> Option<&CoefCorrection> {
        self.ann.coef.as_ref()
    }

    pub(crate) fn set_evaluation(
        &mut self,
        expr: CompiledExpr,
        pre_y: Option<Arc<Vec<f64>>>,
        y_dim: Dim,
        dim_score: f64,
    ) {
        self.ann.expr = Some(expr);
        self.ann.pre_y = pre_y;
        self.ann.y_dim = y_dim;
        self.ann.dim_score = dim_score;
    }

    pub(crate) fn set_coef(&mut self, coef: CoefCorrection) {
        self.ann.coef = Some(coef);
    }
}

/// Hashable equality key of a tree; see `ExprTree::signature`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeSignature(pub String);

/// The minimal serializable form of a tree dispatched to batch workers:
/// symbol ids and structural layout only, never cached predictions or
/// function handles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capsule {
    pub nodes: Vec<SymbolId>,
    pub canonical: String,
}

impl Capsule {
    pub fn rebuild(&self, set: &SymbolSet) -> Result<ExprTree> {
        ExprTree::new(self.nodes.clone(), set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dim::Dim;
    use crate::symbols::node::FeatureData;

    fn fixture() -> SymbolSet {
        let mut set = SymbolSet::new();
        set.register_terminal(
            "x0",
            FeatureData::Column(Arc::new(vec![1.0, 2.0, 3.0])),
            Dim::from_exponents(&[1.0]),
            1.0,
            Some("speed"),
        )
        .unwrap();
        set.register_terminal(
            "x1",
            FeatureData::Column(Arc::new(vec![4.0, 5.0, 6.0])),
            Dim::from_exponents(&[1.0]),
            1.0,
            None,
        )
        .unwrap();
        set.add_operations(&["Add", "Mul", "Neg"]).unwrap();
        set
    }

    fn id(set: &SymbolSet, name: &str) -> SymbolId {
        set.lookup(name).unwrap()
    }

    #[test]
    fn construction_rejects_malformed_sequences() {
        let set = fixture();
        let (add, x0) = (id(&set, "Add"), id(&set, "x0"));
        // dangling argument slot
        assert!(matches!(
            ExprTree::new(vec![add, x0], &set),
            Err(SymregError::Structure(_))
        ));
        // trailing orphan node
        assert!(matches!(
            ExprTree::new(vec![add, x0, x0, x0], &set),
            Err(SymregError::Structure(_))
        ));
        assert!(ExprTree::new(vec![add, x0, x0], &set).is_ok());
    }

    #[test]
    fn subtree_ranges_close() {
        let set = fixture();
        let (add, mul, x0, x1) = (
            id(&set, "Add"),
            id(&set, "Mul"),
            id(&set, "x0"),
            id(&set, "x1"),
        );
        // Add(Mul(x0, x1), x0)
        let tree = ExprTree::new(vec![add, mul, x0, x1, x0], &set).unwrap();
        assert_eq!(tree.subtree(0, &set).unwrap(), 0..5);
        assert_eq!(tree.subtree(1, &set).unwrap(), 1..4);
        assert_eq!(tree.subtree(2, &set).unwrap(), 2..3);
        assert_eq!(tree.subtree(4, &set).unwrap(), 4..5);
        assert!(tree.subtree(9, &set).is_err());
    }

    #[test]
    fn replace_range_checks_arity_balance() {
        let set = fixture();
        let (add, mul, neg, x0, x1) = (
            id(&set, "Add"),
            id(&set, "Mul"),
            id(&set, "Neg"),
            id(&set, "x0"),
            id(&set, "x1"),
        );
        let mut tree = ExprTree::new(vec![add, mul, x0, x1, x0], &set).unwrap();

        // a subtree may be replaced by another complete subtree
        tree.replace_range(1..4, &[neg, x1], &set).unwrap();
        assert_eq!(tree.render_machine(&set), "Add(Neg(x1), x0)");

        // but not by an unbalanced sequence
        let before = tree.nodes().to_vec();
        let err = tree.replace_range(1..3, &[x0], &set);
        assert!(matches!(err, Err(SymregError::ArityMismatch(_))));
        assert_eq!(tree.nodes(), &before[..]);
    }

    #[test]
    fn edits_reset_cached_annotations() {
        let set = fixture();
        let (add, x0, x1) = (id(&set, "Add"), id(&set, "x0"), id(&set, "x1"));
        let mut tree = ExprTree::new(vec![add, x0, x0], &set).unwrap();
        tree.set_evaluation(
            CompiledExpr::Terminal(x0),
            Some(Arc::new(vec![2.0, 4.0, 6.0])),
            Dim::from_exponents(&[1.0]),
            1.0,
        );
        tree.set_promoted_name("new0".to_string());
        assert!(tree.pre_y().is_some());
        assert_eq!(tree.canonical(&set), "Add(x0, x0)");

        tree.set_node(2, x1, &set).unwrap();
        assert!(tree.pre_y().is_none());
        assert!(tree.compiled().is_none());
        assert!(tree.promoted_name().is_none());
        assert!(tree.y_dim().is_invalid());
        assert_eq!(tree.dim_score(), 0.0);
        assert_eq!(tree.canonical(&set), "Add(x0, x1)");
    }

    #[test]
    fn set_node_requires_same_arity() {
        let set = fixture();
        let (add, neg, x0) = (id(&set, "Add"), id(&set, "Neg"), id(&set, "x0"));
        let mut tree = ExprTree::new(vec![add, x0, x0], &set).unwrap();
        assert!(matches!(
            tree.set_node(0, neg, &set),
            Err(SymregError::ArityMismatch(_))
        ));
        assert!(matches!(
            tree.set_node(1, add, &set),
            Err(SymregError::ArityMismatch(_))
        ));
    }

    #[test]
    fn height_counts_depth() {
        let set = fixture();
        let (add, mul, x0, x1) = (
            id(&set, "Add"),
            id(&set, "Mul"),
            id(&set, "x0"),
            id(&set, "x1"),
        );
        let leaf = ExprTree::new(vec![x0], &set).unwrap();
        assert_eq!(leaf.height(&set), 0);
        let tree = ExprTree::new(vec![add, mul, x0, x1, x0], &set).unwrap();
        assert_eq!(tree.height(&set), 2);
    }

    #[test]
    fn rendering_skips_pass_through_markers() {
        let set = fixture();
        let (add, x0, x1, keep) = (
            id(&set, "Add"),
            id(&set, "x0"),
            id(&set, "x1"),
            id(&set, "Self"),
        );
        let plain = ExprTree::new(vec![add, x0, x1], &set).unwrap();
        let marked = ExprTree::new(vec![keep, add, keep, x0, keep, x1], &set).unwrap();
        assert_eq!(plain.render_machine(&set), "Add(x0, x1)");
        assert_eq!(marked.render_machine(&set), "Add(x0, x1)");
        assert!(plain.equals(&marked, &set));
        assert_eq!(plain.signature(&set), marked.signature(&set));
    }

    #[test]
    fn display_rendering_uses_long_names() {
        let set = fixture();
        let (add, x0, x1) = (id(&set, "Add"), id(&set, "x0"), id(&set, "x1"));
        let tree = ExprTree::new(vec![add, x0, x1], &set).unwrap();
        assert_eq!(tree.render_machine(&set), "Add(x0, x1)");
        // x0 was registered with display name "speed"; x1 falls back
        assert_eq!(tree.render_display(&set), "Add(speed, x1)");
    }

    #[test]
    fn terminals_and_positions() {
        let set = fixture();
        let (add, mul, x0, x1) = (
            id(&set, "Add"),
            id(&set, "Mul"),
            id(&set, "x0"),
            id(&set, "x1"),
        );
        let tree = ExprTree::new(vec![add, mul, x0, x1, x0], &set).unwrap();
        let names: Vec<&str> = tree.terminals(&set).iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["x0", "x1", "x0"]);
        assert_eq!(tree.terminal_positions(&set), vec![2, 3, 4]);
    }

    #[test]
    fn capsule_round_trips_through_serde() {
        let set = fixture();
        let (add, x0, x1) = (id(&set, "Add"), id(&set, "x0"), id(&set, "x1"));
        let tree = ExprTree::new(vec![add, x0, x1], &set).unwrap();
        let capsule = tree.capsule(&set);
        let json = serde_json::to_string(&capsule).unwrap();
        let back: Capsule = serde_json::from_str(&json).unwrap();
        let rebuilt = back.rebuild(&set).unwrap();
        assert!(rebuilt.equals(&tree, &set));
        assert_eq!(back.canonical, "Add(x0, x1)");
    }
}
