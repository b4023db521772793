pub mod artifact;
pub mod features;
pub mod forest;
pub mod metrics;
pub mod registry;

pub use artifact::{
    LatestPointer, ModelArtifact, ModelType, TrainedModel, VersionId, VersionMetadata,
    VersionSelector,
};
pub use features::{
    build_inference_vector, build_training_set, FeatureVector, LabeledExample, SeasonIndex,
    NUM_FEATURES,
};
pub use forest::{ForestParams, RandomForest};
pub use metrics::ModelMetrics;
pub use registry::ModelRegistry;
