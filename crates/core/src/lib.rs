//! Incremental, resumable pull of forms and submissions from
//! Aggregate-compatible servers.

pub mod attachment;
pub mod config;
pub mod cursor;
pub mod form;
pub mod http;
pub mod index;
pub mod instance_ids;
pub mod job;
pub mod pull;
pub mod server;
pub mod storage;
pub mod testing;
mod xml;

pub use attachment::{parse_manifest, Attachment, HashScheme};
pub use config::{
    config_path, load_config, load_config_from_str, validate_config, Config, ConfigError, PullConfig,
    RunnerConfig, SanitizedConfig, ServerConfig, StorageConfig,
};
pub use cursor::Cursor;
pub use form::{FormError, FormKey, SubmissionKeyGenerator};
pub use http::{Http, HttpError, ReqwestHttp, Request, Response};
pub use index::{IndexError, InstanceIndex, MemoryInstanceIndex, SqliteInstanceIndex};
pub use instance_ids::{parse_id_chunk, InstanceIdBatch, InstanceIdBatchGetter};
pub use job::{Canceller, Job, JobError, JobsRunner, RunnerHandle, RunnerStatus};
pub use pull::{
    resolve_start_cursor, DownloadedSubmission, EventSink, FormStatus, ProgressEvent,
    ProgressKind, PullError, PullFromAggregate, PullOptions, PullResult, PullSummary,
    PullTracker,
};
pub use server::{AggregateServer, ProtocolError};
pub use storage::{FormLayout, StorageError};
