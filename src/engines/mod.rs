pub mod evaluation;
pub mod generation;
pub mod tree;

pub use evaluation::{BatchOutcome, CalculateEngine, EngineConfig, Evaluation, ScorePenalty};
pub use generation::{gen_full, gen_grow, generate};
pub use tree::{Capsule, ExprTree, TreeSignature};
