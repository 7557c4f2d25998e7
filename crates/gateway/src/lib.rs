// Rollcall Gateway - presence registry and snapshot fanout
//
// Registrant connections announce who is online, the presence manager keeps
// the user store in step with live connections, and every change is pushed
// as a full snapshot to the connected viewers.

pub mod admin;
pub mod display;
pub mod error;
pub mod fanout;
pub mod handler;
pub mod presence;
pub mod protocol;
pub mod publisher;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;

pub use admin::AdminState;
pub use display::DisplayServer;
pub use error::GatewayError;
pub use fanout::{BroadcastReport, ViewerFanout};
pub use handler::{Outcome, RegistrationHandler};
pub use presence::PresenceManager;
pub use protocol::{PresenceEntry, Snapshot};
pub use publisher::{CapturingSink, HttpSnapshotSink, SnapshotPublisher, SnapshotSink};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, ConnectionState};
pub use server::{ConnectionOptions, ConnectionService, GatewayServer};
pub use shutdown::{Shutdown, ShutdownSignal};
