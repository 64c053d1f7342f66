//! acctfleet-engine: persistence, session lifecycle, batched import and the
//! bounded dispatch pool. The remote platform is reached only through an
//! [`backend::AuthBackend`].

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod import;
pub mod session;
pub mod store;

pub use config::FleetConfig;
pub use dispatch::{DispatchEngine, DispatchReport};
pub use import::{ImportReport, Importer};
pub use session::{SessionManager, SessionSettings};
pub use store::{FleetStore, MemoryStore, SqliteStore, StoreError, StoreHandle};
pub use tokio_util::sync::CancellationToken;
