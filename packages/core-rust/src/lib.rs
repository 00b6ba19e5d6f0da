//! `relay` core: service contracts, caching directives, sessions, envelopes,
//! and the remote error taxonomy shared by client and host.

pub mod clock;
pub mod contract;
pub mod directive;
pub mod envelope;
pub mod error;
pub mod session;

pub use clock::{ClockSource, ManualClock, SystemClock};
pub use contract::{ServiceContractDescriptor, TransferMode};
pub use directive::{CachingDirective, CachingSite};
pub use envelope::{headers, Headers, ReplyEnvelope, RequestEnvelope, ServiceRequest};
pub use error::{ApplicationFault, RemoteError};
pub use session::{ChannelCredentials, SessionToken, StaticCredentials, UserCredentialsProvider};

