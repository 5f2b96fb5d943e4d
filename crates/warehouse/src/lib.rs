//! Query execution against Amazon Redshift.
//!
//! Two interchangeable [`ExecutionBackend`] implementations:
//! - [`PollingExecutor`]: submit + poll through the Redshift Data API
//! - [`SessionExecutor`]: pooled Postgres-protocol sessions opened with
//!   temporary credentials from an assumed role
//!
//! Both are bounded by a per-query deadline, honour caller cancellation and
//! can be wrapped in an [`AdmissionLimit`].

pub mod backend;
pub mod config;
pub mod credentials;
pub mod data_api;
pub mod error;
pub mod limit;
pub mod polling;
pub mod redshift;
pub mod result;
pub mod session;

pub use backend::{build_backend, ExecutionBackend, ExecutionContext, Interrupt};
pub use config::{BackendKind, WarehouseConfig};
pub use credentials::{CredentialCache, CredentialProvider, Credentials, StsCredentialProvider};
pub use data_api::RedshiftDataApi;
pub use error::{ExecutionError, ExecutionErrorKind};
pub use limit::AdmissionLimit;
pub use polling::{PollBackoff, PollingExecutor, StatementApi, StatementStatus};
pub use redshift::{AwsClusterApi, ClusterApi, DatabaseLogin, PgSession, RedshiftConnector};
pub use result::{encode, QueryResult, RawResultSet, Row};
pub use session::{
    ClusterEndpoint, SessionConnector, SessionExecutor, SessionLease, SessionPool, WarehouseSession,
};
