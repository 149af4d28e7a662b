//! ViP Resolution Service (CRP)
//!
//! Maps logical addresses to `(ip, port)` pairs, ARP style: optimistic
//! caching with a capped TTL and broadcast requests as the fallback.
//!
//! The [`Resolver`] is a sans-IO state machine. Its owner feeds it received
//! datagrams and timer ticks and sends whatever [`Resolver::poll_transmit`]
//! hands back; nothing in this crate touches a socket.

pub mod cache;
pub mod config;
pub mod error;
pub mod identity;
pub mod packet;
pub mod resolver;

pub use cache::TtlClass;
pub use config::CrpConfig;
pub use error::{CrpError, Result};
pub use identity::{Identity, IdentityId, Registration, Removal};
pub use packet::CrpPacket;
pub use resolver::{
    Resolution, Resolve, ResolveStatus, Resolver, ResolverEvent, ResolverStats, Transmit,
};
