pub mod chart;
pub mod codegen;
pub mod config;
pub mod connector;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod flow;
pub mod llm;
pub mod memory;
pub mod registry;
pub mod response;
pub mod sandbox;
pub mod schema;
pub mod session;
pub mod sql;

pub use chart::{ChartKind, ChartRequest, ChartSpec};
pub use config::EngineConfig;
pub use connector::SourceDescriptor;
pub use dataset::{ColumnProfile, ColumnType, Dataset};
pub use engine::AnalysisEngine;
pub use error::{
    ConnectorError, EngineError, ExecutionError, ExecutionErrorKind, GenerationError, QueryError,
    QueryErrorKind, Result,
};
pub use llm::{CandidateCode, CodeGenerator, MockGenerator, OpenAiGenerator, OutputKind};
pub use response::TypedResult;
pub use schema::{ColumnSchema, RelationSchema, SemanticSchema, TransformationRule};
pub use session::SessionManager;
