pub mod context;
pub mod engine;
pub mod factors;

pub use context::{EvaluationInputs, IpIntelligence, RiskContext};
pub use engine::{calculate_risk_score, FactorName, FactorScore, RiskFactor, RiskScoreResult};
