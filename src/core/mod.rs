pub mod circuit_breaker;
pub mod pipeline;
pub mod types;

pub use circuit_breaker::CircuitBreaker;
pub use pipeline::EventProcessingPipeline;
