pub mod context_resolver;
pub mod highlight_annotator;
pub mod intensity;
pub mod keywords;
pub mod signal;

pub use context_resolver::*;
pub use highlight_annotator::*;
pub use intensity::*;
pub use keywords::*;
pub use signal::{FrequencyTable, SignalAnalysis, SignalEngine, SpikeInterval};
