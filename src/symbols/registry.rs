use crate::dim::{Dim, DimRule};
use crate::engines::tree::ExprTree;
use crate::error::{Result, SymregError};
use polars::prelude::{Column, DataFrame, DataType as PlDataType};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use super::node::{
    FeatureData, NodeDef, Primitive, PrimitiveFn, Structural, StructuralFn, SymbolId, Terminal,
};
use super::primitives::{builtin_primitive, builtin_structurals, power_spec};

/// The single source of truth for every symbol a tree may reference:
/// terminals and constants (with their stored data and dimensions),
/// primitives, and structural operators.
///
/// Definitions live in an arena indexed by `SymbolId`; the arena doubles as
/// the computation context that evaluation resolves ids against. Names are
/// globally unique; registering a duplicate is a fatal configuration error
/// that leaves the set unmodified.
pub struct SymbolSet {
    name: String,
    defs: Vec<NodeDef>,
    by_name: HashMap<String, SymbolId>,
    terminals: Vec<SymbolId>,
    primitives: Vec<SymbolId>,
    structurals: Vec<SymbolId>,
    y: Vec<f64>,
    y_dim: Dim,
    feature_count: usize,
    group_count: usize,
    constant_count: usize,
    promoted_count: usize,
}

impl SymbolSet {
    pub fn new() -> Self {
        Self::with_name("PSet")
    }

    pub fn with_name(name: &str) -> Self {
        Self {
            name: name.to_string(),
            defs: Vec::new(),
            by_name: HashMap::new(),
            terminals: Vec::new(),
            primitives: Vec::new(),
            structurals: Vec::new(),
            y: Vec::new(),
            y_dim: Dim::dimensionless(1),
            feature_count: 0,
            group_count: 0,
            constant_count: 0,
            promoted_count: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbol_count(&self) -> usize {
        self.defs.len()
    }

    pub fn get(&self, id: SymbolId) -> Option<&NodeDef> {
        self.defs.get(id.index())
    }

    /// Panics on an id issued by a different registry; trees are never valid
    /// outside the set that produced them.
    pub fn def(&self, id: SymbolId) -> &NodeDef {
        &self.defs[id.index()]
    }

    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.by_name.get(name).copied()
    }

    pub fn target(&self) -> &[f64] {
        &self.y
    }

    pub fn target_dim(&self) -> &Dim {
        &self.y_dim
    }

    /// Install the regression target directly, bypassing DataFrame ingestion.
    pub fn set_target(&mut self, y: Vec<f64>, y_dim: Dim) {
        self.y = y;
        self.y_dim = y_dim;
    }

    // --- Registration ---

    fn ensure_unique(&self, name: &str) -> Result<()> {
        if self.by_name.contains_key(name) {
            return Err(SymregError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    fn ensure_weight(name: &str, weight: f64) -> Result<()> {
        if !(weight.is_finite() && weight > 0.0) {
            return Err(SymregError::Configuration(format!(
                "selection weight for '{name}' must be finite and positive, got {weight}"
            )));
        }
        Ok(())
    }

    fn push(&mut self, def: NodeDef) -> SymbolId {
        let id = SymbolId(self.defs.len() as u32);
        self.by_name.insert(def.name().to_string(), id);
        match def {
            NodeDef::Terminal(_) => self.terminals.push(id),
            NodeDef::Primitive(_) => self.primitives.push(id),
            NodeDef::Structural(_) => self.structurals.push(id),
        }
        self.defs.push(def);
        id
    }

    pub fn register_terminal(
        &mut self,
        name: &str,
        data: FeatureData,
        dim: Dim,
        weight: f64,
        display_name: Option<&str>,
    ) -> Result<SymbolId> {
        self.ensure_unique(name)?;
        Self::ensure_weight(name, weight)?;
        log::debug!("registering terminal '{name}'");
        Ok(self.push(NodeDef::Terminal(Terminal {
            name: name.to_string(),
            display_name: display_name.map(str::to_string),
            dim,
            weight,
            data,
            is_constant: false,
        })))
    }

    pub fn register_constant(
        &mut self,
        name: Option<&str>,
        value: f64,
        dim: Dim,
        weight: f64,
    ) -> Result<SymbolId> {
        let auto;
        let name = match name {
            Some(n) => n,
            None => {
                auto = format!("c{}", self.constant_count);
                &auto
            }
        };
        self.ensure_unique(name)?;
        Self::ensure_weight(name, weight)?;
        log::debug!("registering constant '{name}' = {value}");
        let id = self.push(NodeDef::Terminal(Terminal {
            name: name.to_string(),
            display_name: None,
            dim,
            weight,
            data: FeatureData::Scalar(value),
            is_constant: true,
        }));
        self.constant_count += 1;
        Ok(id)
    }

    pub fn register_primitive(
        &mut self,
        name: &str,
        func: PrimitiveFn,
        arity: usize,
        weight: f64,
        dim_rule: Option<DimRule>,
    ) -> Result<SymbolId> {
        self.ensure_unique(name)?;
        Self::ensure_weight(name, weight)?;
        let prim = Primitive::new(
            name,
            func,
            arity,
            weight,
            dim_rule.unwrap_or(DimRule::First),
        )?;
        log::debug!("registering primitive '{name}' (arity {arity})");
        Ok(self.push(NodeDef::Primitive(prim)))
    }

    pub fn register_structural(
        &mut self,
        name: &str,
        func: StructuralFn,
        weight: f64,
        dim_rule: Option<DimRule>,
    ) -> Result<SymbolId> {
        self.ensure_unique(name)?;
        Self::ensure_weight(name, weight)?;
        log::debug!("registering structural operator '{name}'");
        Ok(self.push(NodeDef::Structural(Structural {
            name: name.to_string(),
            weight,
            func,
            dim_rule: dim_rule.unwrap_or(DimRule::First),
        })))
    }

    /// Register builtin operators by name (`Add`, `Mul`, `exp`, ...). The
    /// structural table is installed first if it is still empty, so grouped
    /// features always have an aggregator available.
    pub fn add_operations(&mut self, names: &[&str]) -> Result<()> {
        if self.structurals.is_empty() {
            self.add_accumulators()?;
        }
        for name in names {
            let spec = builtin_primitive(name).ok_or_else(|| {
                SymregError::Configuration(format!("unknown builtin operation '{name}'"))
            })?;
            self.register_primitive(
                spec.name,
                spec.func,
                spec.func.arity(),
                spec.weight,
                Some(spec.dim_rule),
            )?;
        }
        Ok(())
    }

    /// Register fixed-exponent power operators, named `pow0`, `pow1`, ...
    /// in the order of `exponents`.
    pub fn add_power_operations(&mut self, exponents: &[f64]) -> Result<()> {
        let weight = 1.0 / exponents.len().max(1) as f64;
        for (j, e) in exponents.iter().enumerate() {
            let (func, rule) = power_spec(*e);
            self.register_primitive(&format!("pow{j}"), func, 1, weight, Some(rule))?;
        }
        Ok(())
    }

    /// Install the builtin structural operator table (`Self`, `MAdd`, ...).
    pub fn add_accumulators(&mut self) -> Result<()> {
        for spec in builtin_structurals() {
            self.register_structural(spec.name, spec.func, spec.weight, Some(spec.dim_rule))?;
        }
        Ok(())
    }

    // --- Bulk ingestion ---

    /// Register every non-target column of `df` as a feature terminal
    /// (`x0`, `x1`, ... with the column name kept as display name) and
    /// capture the target column and its dimension.
    ///
    /// `x_dims` must be empty (all dimensionless) or hold one dimension per
    /// feature column; `weights` likewise (default 1.0).
    pub fn add_features(
        &mut self,
        df: &DataFrame,
        target: &str,
        x_dims: &[Dim],
        y_dim: Dim,
        weights: Option<&[f64]>,
    ) -> Result<()> {
        let y = column_to_vec(df.column(target)?)?;
        if y.is_empty() {
            return Err(SymregError::Configuration(
                "target column is empty".to_string(),
            ));
        }

        let columns: Vec<&Column> = df
            .get_columns()
            .iter()
            .filter(|c| c.name().as_str() != target)
            .collect();
        if !x_dims.is_empty() && x_dims.len() != columns.len() {
            return Err(SymregError::Configuration(format!(
                "expected {} feature dimensions, got {}",
                columns.len(),
                x_dims.len()
            )));
        }
        if let Some(w) = weights {
            if w.len() != columns.len() {
                return Err(SymregError::Configuration(format!(
                    "expected {} feature weights, got {}",
                    columns.len(),
                    w.len()
                )));
            }
        }

        for (i, col) in columns.iter().enumerate() {
            let values = column_to_vec(col)?;
            let dim = x_dims.get(i).cloned().unwrap_or_else(|| Dim::dimensionless(1));
            let weight = weights.map_or(1.0, |w| w[i]);
            let canonical = format!("x{}", self.feature_count);
            let col_name = col.name().as_str();
            let display = (col_name != canonical).then_some(col_name);
            self.register_terminal(
                &canonical,
                FeatureData::Column(Arc::new(values)),
                dim,
                weight,
                display,
            )?;
            self.feature_count += 1;
        }

        self.y = y;
        self.y_dim = y_dim;
        Ok(())
    }

    /// Register several columns as one grouped terminal (`gx0`, ...) whose
    /// rows share `dim`; displayed as `[a, b, ...]`.
    pub fn add_feature_group(
        &mut self,
        df: &DataFrame,
        cols: &[&str],
        dim: Dim,
        weight: f64,
    ) -> Result<SymbolId> {
        if cols.is_empty() {
            return Err(SymregError::Configuration(
                "a feature group needs at least one column".to_string(),
            ));
        }
        let mut rows = Vec::with_capacity(cols.len());
        for col in cols {
            rows.push(column_to_vec(df.column(col)?)?);
        }
        let display = format!("[{}]", cols.join(", "));
        let name = format!("gx{}", self.group_count);
        let id = self.register_terminal(
            &name,
            FeatureData::Group(Arc::new(rows)),
            dim,
            weight,
            Some(&display),
        )?;
        self.group_count += 1;
        Ok(id)
    }

    /// Register fixed constants `c0`, `c1`, ... Constants default to a low
    /// selection weight so features dominate the draw.
    pub fn add_constants(
        &mut self,
        values: &[f64],
        dims: &[Dim],
        weights: Option<&[f64]>,
    ) -> Result<()> {
        if !dims.is_empty() && dims.len() != values.len() {
            return Err(SymregError::Configuration(format!(
                "expected {} constant dimensions, got {}",
                values.len(),
                dims.len()
            )));
        }
        for (i, v) in values.iter().enumerate() {
            let dim = dims.get(i).cloned().unwrap_or_else(|| Dim::dimensionless(1));
            let weight = weights.map_or(0.1, |w| w[i]);
            self.register_constant(None, *v, dim, weight)?;
        }
        Ok(())
    }

    /// Register an evaluated tree's cached prediction as a new terminal
    /// (`new0`, `new1`, ...) carrying the tree's resulting dimension, with
    /// the tree's display rendering as long name. Skips silently when the
    /// prediction is absent or non-finite or the dimension is invalid.
    pub fn promote_tree_to_terminal(
        &mut self,
        tree: &mut ExprTree,
        weight: f64,
    ) -> Result<Option<SymbolId>> {
        let Some(pre_y) = tree.pre_y().cloned() else {
            log::warn!("skipping promotion: tree has no cached prediction");
            return Ok(None);
        };
        if tree.y_dim().is_invalid() || !pre_y.iter().all(|v| v.is_finite()) {
            log::warn!("skipping promotion: invalid dimension or non-finite prediction");
            return Ok(None);
        }
        let name = format!("new{}", self.promoted_count);
        let display = tree.render_display(self);
        let dim = tree.y_dim().clone();
        let id = self.register_terminal(
            &name,
            FeatureData::Column(pre_y),
            dim,
            weight,
            Some(&display),
        )?;
        self.promoted_count += 1;
        tree.set_promoted_name(name);
        Ok(Some(id))
    }

    // --- Aligned selection tables ---

    pub fn terminal_ids(&self) -> &[SymbolId] {
        &self.terminals
    }

    pub fn primitive_ids(&self) -> &[SymbolId] {
        &self.primitives
    }

    pub fn structural_ids(&self) -> &[SymbolId] {
        &self.structurals
    }

    fn defs_of(&self, ids: &[SymbolId]) -> Vec<&NodeDef> {
        ids.iter().map(|id| self.def(*id)).collect()
    }

    fn weights_of(&self, ids: &[SymbolId]) -> Vec<f64> {
        ids.iter().map(|id| self.def(*id).weight()).collect()
    }

    fn probabilities_of(&self, ids: &[SymbolId]) -> Vec<f64> {
        let weights = self.weights_of(ids);
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return weights;
        }
        weights.into_iter().map(|w| w / total).collect()
    }

    pub fn terminal_defs(&self) -> Vec<&NodeDef> {
        self.defs_of(&self.terminals)
    }

    pub fn terminal_weights(&self) -> Vec<f64> {
        self.weights_of(&self.terminals)
    }

    pub fn terminal_probabilities(&self) -> Vec<f64> {
        self.probabilities_of(&self.terminals)
    }

    pub fn terminal_dims(&self) -> Vec<Dim> {
        self.terminals
            .iter()
            .map(|id| self.def(*id).dim().cloned().unwrap_or(Dim::Invalid))
            .collect()
    }

    pub fn primitive_defs(&self) -> Vec<&NodeDef> {
        self.defs_of(&self.primitives)
    }

    pub fn primitive_weights(&self) -> Vec<f64> {
        self.weights_of(&self.primitives)
    }

    pub fn primitive_probabilities(&self) -> Vec<f64> {
        self.probabilities_of(&self.primitives)
    }

    pub fn structural_defs(&self) -> Vec<&NodeDef> {
        self.defs_of(&self.structurals)
    }

    pub fn structural_weights(&self) -> Vec<f64> {
        self.weights_of(&self.structurals)
    }

    pub fn structural_probabilities(&self) -> Vec<f64> {
        self.probabilities_of(&self.structurals)
    }

    /// Share of terminals among all drawable nodes; the generator's grow
    /// condition uses this as its stop probability.
    pub fn terminal_ratio(&self) -> f64 {
        let t = self.terminals.len();
        let p = self.primitives.len();
        if t + p == 0 {
            return 1.0;
        }
        t as f64 / (t + p) as f64
    }

    /// One-way conversion into the metadata-only reporting view, discarding
    /// stored data and function handles.
    pub fn compress(self) -> CompressedSymbolSet {
        let symbols = self
            .defs
            .iter()
            .map(|def| CompressedSymbol {
                name: def.name().to_string(),
                kind: match def {
                    NodeDef::Terminal(t) if t.is_constant => SymbolKind::Constant,
                    NodeDef::Terminal(_) => SymbolKind::Terminal,
                    NodeDef::Primitive(_) => SymbolKind::Primitive,
                    NodeDef::Structural(_) => SymbolKind::Structural,
                },
                arity: def.arity(),
                dim: def.dim().cloned(),
                weight: def.weight(),
                display_name: match def {
                    NodeDef::Terminal(t) => t.display_name.clone(),
                    _ => None,
                },
            })
            .collect();
        CompressedSymbolSet {
            name: self.name,
            symbols,
        }
    }
}

impl Default for SymbolSet {
    fn default() -> Self {
        Self::new()
    }
}

fn column_to_vec(col: &Column) -> Result<Vec<f64>> {
    let series = col.as_materialized_series().cast(&PlDataType::Float64)?;
    let ca = series.f64()?;
    Ok(ca.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SymbolKind {
    Terminal,
    Constant,
    Primitive,
    Structural,
}

/// Metadata an archived search retains per symbol after compression.
#[derive(Debug, Clone, Serialize)]
pub struct CompressedSymbol {
    pub name: String,
    pub kind: SymbolKind,
    pub arity: usize,
    pub dim: Option<Dim>,
    pub weight: f64,
    pub display_name: Option<String>,
}

/// The reporting view of a finished search: names, arities, dimensions and
/// weights, with every heavyweight payload gone. There is no way back to a
/// full `SymbolSet`.
#[derive(Debug, Clone, Serialize)]
pub struct CompressedSymbolSet {
    name: String,
    symbols: Vec<CompressedSymbol>,
}

impl CompressedSymbolSet {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbols(&self) -> &[CompressedSymbol] {
        &self.symbols
    }

    pub fn terminals(&self) -> impl Iterator<Item = &CompressedSymbol> {
        self.symbols
            .iter()
            .filter(|s| matches!(s.kind, SymbolKind::Terminal | SymbolKind::Constant))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_set() -> SymbolSet {
        let mut set = SymbolSet::new();
        set.register_terminal(
            "x0",
            FeatureData::Column(Arc::new(vec![1.0, 2.0, 3.0])),
            Dim::from_exponents(&[1.0, 0.0]),
            1.0,
            None,
        )
        .unwrap();
        set.register_constant(None, 2.5, Dim::dimensionless(1), 0.1)
            .unwrap();
        set.add_operations(&["Add", "Mul"]).unwrap();
        set
    }

    #[test]
    fn duplicate_name_is_fatal_and_leaves_set_unchanged() {
        let mut set = demo_set();
        let before = set.symbol_count();
        let err = set.register_terminal(
            "x0",
            FeatureData::Scalar(0.0),
            Dim::dimensionless(1),
            1.0,
            None,
        );
        assert!(matches!(err, Err(SymregError::DuplicateName(_))));
        assert_eq!(set.symbol_count(), before);

        // duplicates are caught across categories too
        let err = set.register_primitive(
            "x0",
            PrimitiveFn::Unary(|a| a),
            1,
            1.0,
            None,
        );
        assert!(matches!(err, Err(SymregError::DuplicateName(_))));
        assert_eq!(set.symbol_count(), before);
    }

    #[test]
    fn selection_tables_stay_aligned() {
        let set = demo_set();
        assert_eq!(set.terminal_defs().len(), set.terminal_weights().len());
        assert_eq!(set.terminal_defs().len(), set.terminal_dims().len());
        assert_eq!(set.primitive_defs().len(), set.primitive_weights().len());

        let probs = set.terminal_probabilities();
        let total: f64 = probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn add_operations_installs_structurals_once() {
        let set = demo_set();
        assert!(set.lookup("Self").is_some());
        assert!(set.lookup("MAdd").is_some());
        let names: Vec<&str> = set.structural_defs().iter().map(|d| d.name()).collect();
        assert_eq!(names.iter().filter(|n| **n == "Self").count(), 1);
    }

    #[test]
    fn unknown_builtin_is_a_configuration_error() {
        let mut set = SymbolSet::new();
        let err = set.add_operations(&["Frobnicate"]);
        assert!(matches!(err, Err(SymregError::Configuration(_))));
    }

    #[test]
    fn power_operations_are_numbered() {
        let mut set = SymbolSet::new();
        set.add_power_operations(&[0.5, 2.0, 3.0]).unwrap();
        assert!(set.lookup("pow0").is_some());
        assert!(set.lookup("pow2").is_some());
        assert_eq!(set.primitive_ids().len(), 3);
    }

    #[test]
    fn compress_keeps_metadata_only() {
        let set = demo_set();
        let count = set.symbol_count();
        let compressed = set.compress();
        assert_eq!(compressed.symbols().len(), count);
        let x0 = &compressed.symbols()[0];
        assert_eq!(x0.name, "x0");
        assert_eq!(x0.kind, SymbolKind::Terminal);
        assert_eq!(x0.arity, 0);
        assert_eq!(x0.dim, Some(Dim::from_exponents(&[1.0, 0.0])));
        assert!(compressed.terminals().count() >= 2);
    }

    #[test]
    fn terminal_ratio_reflects_table_sizes() {
        let set = demo_set();
        // 2 terminals (x0, c0) vs 2 primitives (Add, Mul)
        assert!((set.terminal_ratio() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn zero_weight_is_rejected() {
        let mut set = SymbolSet::new();
        let err = set.register_constant(Some("c"), 1.0, Dim::dimensionless(1), 0.0);
        assert!(matches!(err, Err(SymregError::Configuration(_))));
    }
}
