//! # dawlink-collab — Editor sessions and replication for dawlink
//!
//! The stateful half of dawlink: local sessions that place a GUI-only
//! editor's project file under version control, plus host-authoritative
//! replication of a session across the network.
//!
//! ```text
//!                    ┌────────────────┐
//!  editor process ── │  LocalSession   │ ── .dlc container
//!  (working .hprj)   │  (history +     │
//!        ▲           │   watcher)      │
//!        │           └───────┬────────┘
//!   ChangeWatcher            │
//!                   ┌────────┴────────┐
//!                   ▼                 ▼
//!            ┌────────────┐   ┌────────────┐
//!            │ HostSession │◄──│ClientSession│  (WebSocket, bincode)
//!            │ (authority) │──►│ (follower)  │
//!            └────────────┘   └────────────┘
//! ```
//!
//! The host is the single write authority: client commits travel as
//! proposals, the host applies them in arrival order, and every applied
//! operation is broadcast with its sequence index. Clients verify the
//! index and resync from a fresh snapshot on any gap.

pub mod client;
pub mod endpoint;
pub mod host;
pub mod peers;
pub mod process;
pub mod protocol;
pub mod runtime;
pub mod session;
pub mod watch;

pub use client::{ClientConfig, ClientEvent, ClientSession};
pub use endpoint::{decode_token, encode_token, EndpointDescriptor, TokenError};
pub use host::{HostConfig, HostSession, HostStats};
pub use peers::{PeerIdentity, PeerRegistry, PeerRole, RegistryStats};
pub use process::{EditorProcess, ProcessError};
pub use protocol::{MessageKind, NetworkError, ProtocolError, WireMessage};
pub use runtime::{Runtime, RuntimeError, Session};
pub use session::{
    EditorKind, EditorTag, LocalSession, SessionError, SessionPhase, WORKING_FILE_NAME,
};
pub use watch::{ChangeWatcher, SubscriptionError};
