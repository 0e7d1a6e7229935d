pub mod credentials;
pub mod engine;
pub mod nvidia;
pub mod region;
pub mod response;

pub use credentials::ApiKey;
pub use engine::{DocumentParser, ParseError, ParseInput, ParseOutput, Stage, TokenUsage};
pub use nvidia::{ClientOptions, NemoRetrieverClient};
pub use region::{AnnotatedRegion, BoundingBox};
pub use response::{extract_usage, parse_regions, regions_or_empty, ResponseError};
