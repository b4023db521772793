pub mod pipeline;
pub mod predictor;
pub mod trainer;

pub use pipeline::Pipeline;
pub use predictor::{PredictionSummary, Predictor};
pub use trainer::Trainer;
