pub use crate::collection::{optimize_identity, Collection, OptimizeFn};
pub use crate::config::DriverConfig;
pub use crate::driver::{
    as_completed, default_driver, wait, ConnectOptions, ConnectTarget, Driver, ErrorPolicy,
    ReturnWhen, Scattered, SubmitOptions, ValueTree, Workers,
};
pub use crate::error::{DriverError, DriverResult};
pub use crate::handle::{Handle, HandleTree};
pub use crate::registry::Status;
pub use crate::stream::{Flow, IterStream, QueueStream, Stream};
pub use crate::task::{Call, Datum, Graph, KeyTree, Node, Tree};
pub use crate::transport::{LocalScheduler, Rpc};
pub use conduit::key::Key;
pub use conduit::message::ScatterPayload;
pub use conduit::support::WorkerAddr;
