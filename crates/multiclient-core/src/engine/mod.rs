//! Engine connections and everything that routes requests to them.
//!
//! Two task families share state only through the pool: the [`HealthMonitor`] publishes
//! health records into each [`EngineHandle`], and the [`Dispatcher`] reads ranked
//! [`PoolSnapshot`]s to pick its targets.

pub mod aggregator;
pub mod builder;
pub mod dispatcher;
pub mod errors;
pub mod handle;
pub mod health;
pub mod manager;
pub mod monitor;
pub mod pool;
pub mod snapshot;
pub mod transport;

pub use builder::{BuilderError, MultiClientBuilder};
pub use dispatcher::{DispatchPolicy, Dispatcher};
pub use errors::{DispatchError, EngineError, EngineFailure, ErrorKind, PoolError};
pub use handle::EngineHandle;
pub use health::{HealthRecord, HealthSignal, HealthState, HealthThresholds};
pub use manager::MultiClient;
pub use monitor::{HealthMonitor, MonitorConfig};
pub use pool::{EnginePool, PoolBounds};
pub use snapshot::{PoolSnapshot, SnapshotEntry};
pub use transport::{EngineConnector, EngineTransport, HttpConnector, HttpTransport};
