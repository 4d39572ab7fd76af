//! The evaluation and scoring engine: compiles candidate trees against a
//! registry, executes them over the stored feature data, scores accuracy and
//! dimensional consistency, and batch-scores whole populations on a worker
//! pool.

pub mod compile;
pub mod scoring;

pub use compile::{combine_dims, compile, execute, to_column, CompiledExpr, EvalValue};
pub use scoring::{dim_fitness, fit_linear, r2_score, rmse, CoefCorrection, ScorePenalty, ScoringFn};

use crate::dim::Dim;
use crate::engines::tree::{Capsule, ExprTree};
use crate::error::{Result, SymregError};
use crate::symbols::registry::SymbolSet;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

fn default_scoring() -> ScoringFn {
    r2_score
}

/// Evaluation configuration. `n_jobs = 1` keeps batches sequential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub score_penalty: ScorePenalty,
    /// Compute the dimensional-consistency score alongside accuracy.
    pub calc_dim: bool,
    /// Fit the linear coefficient correction in the detailed pass.
    pub fit_coef: bool,
    pub fit_intercept: bool,
    /// Dimensional fitness granted when the combined dimension is valid but
    /// differs from the target.
    pub dim_penalty: f64,
    pub n_jobs: usize,
    pub batch_size: usize,
    #[serde(skip_serializing, skip_deserializing, default = "default_scoring")]
    pub scoring: ScoringFn,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            score_penalty: ScorePenalty::PositiveBest,
            calc_dim: true,
            fit_coef: true,
            fit_intercept: true,
            dim_penalty: 0.0,
            n_jobs: 1,
            batch_size: 20,
            scoring: r2_score,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_jobs == 0 {
            return Err(SymregError::Configuration(
                "n_jobs must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(SymregError::Configuration(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if !(self.dim_penalty.is_finite() && (0.0..=1.0).contains(&self.dim_penalty)) {
            return Err(SymregError::Configuration(format!(
                "dim_penalty must be within [0, 1], got {}",
                self.dim_penalty
            )));
        }
        Ok(())
    }
}

/// Result of evaluating one tree.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub score: f64,
    pub dim: Dim,
    pub dim_score: f64,
    /// Score after the linear coefficient correction (detailed pass only).
    pub coef_score: Option<f64>,
}

/// Per-tree result of a batch run, in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub score: f64,
    pub dim: Dim,
    pub dim_score: f64,
}

/// Scoring engine bound to one registry.
///
/// The registry may be mutated between evaluations through `symbols_mut`
/// (registration, promotion), never concurrently with a running batch —
/// `evaluate_batch` borrows the engine shared for its whole duration, so the
/// borrow checker enforces that scheduling rule.
pub struct CalculateEngine {
    set: SymbolSet,
    config: EngineConfig,
}

impl CalculateEngine {
    pub fn new(set: SymbolSet, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { set, config })
    }

    pub fn symbols(&self) -> &SymbolSet {
        &self.set
    }

    pub fn symbols_mut(&mut self) -> &mut SymbolSet {
        &mut self.set
    }

    pub fn into_symbols(self) -> SymbolSet {
        self.set
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compile and score one tree, writing the compiled expression,
    /// prediction, result dimension and dimensional fitness back onto it.
    ///
    /// Numeric failures (non-finite predictions, shape mismatches,
    /// unreduced groups) produce the configured worst score; a reference to
    /// a symbol outside this registry is an internal-consistency error and
    /// fails the call.
    pub fn evaluate_simple(&self, tree: &mut ExprTree) -> Result<Evaluation> {
        let compiled = compile(tree, &self.set)?;
        let (score, pred, dim, dim_score) = self.score_compiled(&compiled);
        tree.set_evaluation(compiled, pred.map(Arc::new), dim.clone(), dim_score);
        Ok(Evaluation {
            score,
            dim,
            dim_score,
            coef_score: None,
        })
    }

    /// The simple pass plus the linear coefficient correction. The pure
    /// prediction and score are preserved on the tree; the corrected triple
    /// is cached alongside them.
    pub fn evaluate_detailed(&self, tree: &mut ExprTree) -> Result<Evaluation> {
        let mut evaluation = self.evaluate_simple(tree)?;
        if !self.config.fit_coef {
            return Ok(evaluation);
        }
        if let Some(pre_y) = tree.pre_y().cloned() {
            let y = self.set.target();
            let (slope, intercept) = fit_linear(&pre_y, y, self.config.fit_intercept);
            let corrected: Vec<f64> = pre_y.iter().map(|p| slope * p + intercept).collect();
            let score = self.finite_score((self.config.scoring)(y, &corrected));
            tree.set_coef(CoefCorrection {
                slope,
                intercept,
                pre_y: Arc::new(corrected),
                score,
            });
            evaluation.coef_score = Some(score);
        }
        Ok(evaluation)
    }

    /// Score a population. Each tree is reduced to its capsule, dispatched
    /// to a fixed pool of `n_jobs` workers sharing this registry read-only,
    /// and scored locally; results come back in input order. Per-tree
    /// failures of any kind are absorbed into worst-score outcomes so one
    /// pathological candidate cannot abort the batch.
    pub fn evaluate_batch(&self, trees: &[ExprTree]) -> Result<Vec<BatchOutcome>> {
        let capsules: Vec<Capsule> = trees.iter().map(|t| t.capsule(&self.set)).collect();
        log::debug!(
            "scoring {} tree(s) on {} worker(s)",
            capsules.len(),
            self.config.n_jobs
        );
        if self.config.n_jobs <= 1 {
            return Ok(capsules.iter().map(|c| self.score_capsule(c)).collect());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.n_jobs)
            .build()
            .map_err(|e| {
                SymregError::Configuration(format!("failed to build worker pool: {e}"))
            })?;
        Ok(pool.install(|| {
            capsules
                .par_iter()
                .with_min_len(self.config.batch_size)
                .map(|c| self.score_capsule(c))
                .collect()
        }))
    }

    fn score_capsule(&self, capsule: &Capsule) -> BatchOutcome {
        let worst = || BatchOutcome {
            score: self.config.score_penalty.worst(),
            dim: Dim::Invalid,
            dim_score: 0.0,
        };
        let tree = match capsule.rebuild(&self.set) {
            Ok(tree) => tree,
            Err(_) => return worst(),
        };
        let compiled = match compile(&tree, &self.set) {
            Ok(compiled) => compiled,
            Err(_) => return worst(),
        };
        let (score, _, dim, dim_score) = self.score_compiled(&compiled);
        BatchOutcome {
            score,
            dim,
            dim_score,
        }
    }

    fn score_compiled(&self, compiled: &CompiledExpr) -> (f64, Option<Vec<f64>>, Dim, f64) {
        let (dim, dim_score) = if self.config.calc_dim {
            let dim = combine_dims(compiled, &self.set);
            let dim_score = dim_fitness(&dim, self.set.target_dim(), self.config.dim_penalty);
            (dim, dim_score)
        } else {
            (Dim::dimensionless(1), 1.0)
        };

        let n = self.set.target().len();
        let outcome = execute(compiled, &self.set).and_then(|v| to_column(v, n));
        match outcome {
            Ok(pred) if pred.iter().all(|v| v.is_finite()) => {
                let score = self.finite_score((self.config.scoring)(self.set.target(), &pred));
                (score, Some(pred), dim, dim_score)
            }
            _ => (self.config.score_penalty.worst(), None, dim, dim_score),
        }
    }

    fn finite_score(&self, score: f64) -> f64 {
        if score.is_finite() {
            score
        } else {
            self.config.score_penalty.worst()
        }
    }
}
