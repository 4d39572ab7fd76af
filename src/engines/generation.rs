//! Grow/full tree initialization: stack-driven prefix construction drawing
//! weighted node choices from the registry's selection tables.
//!
//! The contract that matters downstream is structural: every returned tree
//! satisfies the arity-closure invariant enforced by `ExprTree::new`.

use crate::engines::tree::ExprTree;
use crate::error::{Result, SymregError};
use crate::symbols::node::SymbolId;
use crate::symbols::registry::SymbolSet;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::Rng;

/// Grow strategy: leaves may appear at any depth past `min_height`, with the
/// terminal ratio of the registry as the stop probability.
pub fn gen_grow(
    set: &SymbolSet,
    min_height: usize,
    max_height: usize,
    rng: &mut StdRng,
) -> Result<ExprTree> {
    generate(
        set,
        min_height,
        max_height,
        |set, height, depth, rng| {
            depth >= height || (depth >= min_height && rng.gen::<f64>() < set.terminal_ratio())
        },
        rng,
    )
}

/// Full strategy: every leaf sits at exactly the drawn height.
pub fn gen_full(
    set: &SymbolSet,
    min_height: usize,
    max_height: usize,
    rng: &mut StdRng,
) -> Result<ExprTree> {
    generate(set, min_height, max_height, |_, height, depth, _| depth >= height, rng)
}

/// Build one tree: draw a target height in `min_height..=max_height`, expand
/// an open-slot stack drawing primitives until `condition` says stop, then
/// interleave one structural operator ahead of every node. The root
/// structural slot prefers the aggregating operators so grouped features
/// reduce to a single row.
pub fn generate<F>(
    set: &SymbolSet,
    min_height: usize,
    max_height: usize,
    condition: F,
    rng: &mut StdRng,
) -> Result<ExprTree>
where
    F: Fn(&SymbolSet, usize, usize, &mut StdRng) -> bool,
{
    if min_height == 0 || min_height > max_height {
        return Err(SymregError::Generation(format!(
            "height bounds {min_height}..={max_height} are invalid"
        )));
    }
    let terminals = set.terminal_ids();
    if terminals.is_empty() {
        return Err(SymregError::Generation(
            "cannot generate: no terminals are registered".to_string(),
        ));
    }
    let primitives = set.primitive_ids();

    let term_draw = weighted_table(&set.terminal_weights(), "terminal")?;
    let prim_draw = if primitives.is_empty() {
        None
    } else {
        Some(weighted_table(&set.primitive_weights(), "primitive")?)
    };

    let height = rng.gen_range(min_height..=max_height);
    let mut expr: Vec<SymbolId> = Vec::new();
    let mut stack = vec![0usize];
    while let Some(depth) = stack.pop() {
        let want_terminal = condition(set, height, depth, rng) || prim_draw.is_none();
        if want_terminal {
            expr.push(terminals[term_draw.sample(rng)]);
        } else {
            let draw = prim_draw.as_ref().ok_or_else(|| {
                SymregError::Generation(
                    "tried to add a primitive but none are registered".to_string(),
                )
            })?;
            let id = primitives[draw.sample(rng)];
            expr.push(id);
            for _ in 0..set.def(id).arity() {
                stack.push(depth + 1);
            }
        }
    }

    let nodes = interleave_structurals(set, &expr, rng)?;
    ExprTree::new(nodes, set)
}

fn weighted_table(weights: &[f64], what: &str) -> Result<WeightedIndex<f64>> {
    WeightedIndex::new(weights.iter().copied())
        .map_err(|e| SymregError::Generation(format!("bad {what} weight table: {e}")))
}

/// Prefix every drawn node with a structural operator from the structural
/// table. The first slot is biased toward `MAdd`/`MMul` (0.8/0.2) so the
/// whole expression ends in a group reduction. Registries without
/// structural operators produce the bare sequence.
fn interleave_structurals(
    set: &SymbolSet,
    expr: &[SymbolId],
    rng: &mut StdRng,
) -> Result<Vec<SymbolId>> {
    let structurals = set.structural_ids();
    if structurals.is_empty() {
        return Ok(expr.to_vec());
    }
    let draw = weighted_table(&set.structural_weights(), "structural")?;

    let mut nodes = Vec::with_capacity(expr.len() * 2);
    for (i, id) in expr.iter().enumerate() {
        let structural = if i == 0 {
            root_aggregator(set, rng).unwrap_or_else(|| structurals[draw.sample(rng)])
        } else {
            structurals[draw.sample(rng)]
        };
        nodes.push(structural);
        nodes.push(*id);
    }
    Ok(nodes)
}

fn root_aggregator(set: &SymbolSet, rng: &mut StdRng) -> Option<SymbolId> {
    match (set.lookup("MAdd"), set.lookup("MMul")) {
        (Some(madd), Some(mmul)) => Some(if rng.gen::<f64>() < 0.8 { madd } else { mmul }),
        (Some(madd), None) => Some(madd),
        (None, Some(mmul)) => Some(mmul),
        (None, None) => None,
    }
}
