//! Game server adapters.
//!
//! Each backend implements [`GameServer`] on top of its own transport and
//! publishes normalized [`gb_core::GameEvent`]s on an [`Emitter`].

pub mod ban_duration;
pub mod emitter;
pub mod error;
pub mod guard;
pub mod mock;
pub mod parse;
pub mod reachability;
pub mod rust_rcon;
pub mod sdtd;
pub mod surface;
pub mod transport;
pub mod worker;

use gb_config::{AdapterSettings, ConnectionInfo};
use std::sync::Arc;

pub use emitter::{Emitter, ListenerId};
pub use error::{AdapterError, ParseError, Result};
pub use guard::{Guarded, Operation};
pub use mock::MockServer;
pub use rust_rcon::RustRcon;
pub use sdtd::SevenDaysToDie;
pub use surface::{EventSource, GameServer};

/// Builds the adapter for `connection`, wrapped so every failure reaches
/// the error channel.
pub fn build_adapter(connection: &ConnectionInfo, settings: AdapterSettings) -> Arc<dyn GameServer> {
    match connection {
        ConnectionInfo::Sdtd(info) => {
            Arc::new(Guarded::new(SevenDaysToDie::new(info.clone(), settings)))
        }
        ConnectionInfo::Rust(info) => Arc::new(Guarded::new(RustRcon::new(info.clone(), settings))),
        ConnectionInfo::Mock(info) => {
            Arc::new(Guarded::new(MockServer::new(info.clone(), settings)))
        }
    }
}
