pub mod analyser;
pub mod analytics;
pub mod cache;
pub mod collector;
pub mod config;
pub mod error;
pub mod io;
pub mod models;
pub mod utils;

// Re-export the main error types for convenience
pub use error::{KirinukiError, KirinukiResult};

// Re-export the analysis entry points
pub use analyser::{Author, HighlightFilter, StreamAnalyser, StreamAnalysis, UserQuery};
pub use collector::{ChatBatch, ChatCollector, NdjsonCollector};

// Re-export cache types
pub use cache::{
    CacheEntry, CacheStore, Corruption, EvictionPolicy, EvictionStrategy, IntegrityChecker,
    IntegrityStatus, Repair,
};

// Re-export analytics modules
pub use analytics::{
    ContextDefinition, ContextResolver, ContextSource, HighlightAnnotator, IntensityScale,
    KeywordExtractor, SignalEngine, Trigger,
};

pub use config::{AnalyserConfig, ConfigManager, HighlightConfig};
pub use models::{Highlight, IntensityLabel, Message, MessageKind, StreamMetadata};
