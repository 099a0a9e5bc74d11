//! Constraint evaluator implementations

pub mod allowed_times;
pub mod canary;
pub mod depends_on;
pub mod manual_judgement;
pub mod pipeline;

pub use allowed_times::AllowedTimesEvaluator;
pub use canary::CanaryEvaluator;
pub use depends_on::DependsOnEvaluator;
pub use manual_judgement::ManualJudgementEvaluator;
pub use pipeline::PipelineEvaluator;
