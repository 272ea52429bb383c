//! Upload worker for file parts.
//!
//! Each [`UploadWorker`] owns one TCP connection (direct, or tunnelled
//! through an HTTP proxy with `CONNECT`), polls a shared [`JobQueue`] on a
//! timer, and streams one part at a time: a short text header followed by
//! the part's raw bytes. Many workers can drain the same queue.
//!
//! # Tick cycle
//!
//! ```text
//! disconnected ──connect ok──▶ connected ──job──▶ transfer ──▶ connected
//!      ▲   │                      │  ▲                │
//!      │   └─fail: retry_interval │  └─empty: idle_interval
//!      └──── transport broken ────┴───────────────────┘
//! ```

pub mod connection;
pub mod error;
pub mod queue;
pub mod scheduler;
pub mod transfer;
pub mod types;

pub use connection::ConnectionManager;
pub use error::WorkerError;
pub use queue::{JobQueue, SharedQueue};
pub use scheduler::UploadWorker;
pub use transfer::{TransferEngine, open_part_file};
pub use types::{
    ConnectionState, DEFAULT_TRANSMISSION_UNIT, FailurePolicy, ProxyConfig, WorkerConfig,
    WorkerEvent,
};
