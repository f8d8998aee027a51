// ABOUTME: Library root for table-replicator
// ABOUTME: Full and incremental table replication between relational schemas

pub mod commands;
pub mod config;
pub mod error;
pub mod reader;
pub mod replicator;
pub mod schema;
pub mod table;
pub mod transport;
pub mod utils;
pub mod value;
pub mod writer;

pub use config::{EngineConfig, JobFile, Strategy};
pub use error::StoreError;
pub use reader::{ReadOptions, RowCursor};
pub use replicator::{CopyKind, Phase, PipeReport, Replicator};
pub use schema::{infer_type, ColumnSpec, ColumnType, TableSchema};
pub use table::{SyncPlan, TableRef, Watermark};
pub use transport::{connect, Dialect, MysqlTransport, SqliteTransport, Transport};
pub use value::{Row, Value};
pub use writer::WriteOptions;
