//! Client-side session engine for the OTA update protocol.
//!
//! Build requests with [`UpdateClient`], attach it to a service with a
//! [`Connection`], and spawn its [`Engine`]:
//!
//! ```no_run
//! # async fn demo() -> Result<(), ota_client::ClientError> {
//! use ota_client::{ClientConfig, UpdateClient, transport};
//!
//! let (client, engine) = UpdateClient::new(&ClientConfig::default());
//! tokio::spawn(engine.run());
//!
//! let (connection, _service) = transport::in_process();
//! client.bind(connection);
//! client.search(false)?;
//! # Ok(())
//! # }
//! ```

mod builder;
mod client;
mod config;
mod dispatcher;
mod error;
mod session;
pub mod transport;

pub use builder::RequestBuilder;
pub use client::{Engine, Event, UpdateClient};
pub use config::{ClientConfig, Preferences};
pub use dispatcher::{Dispatch, Dispatcher, DropReason, Effect, transition};
pub use error::{ClientError, ConfigError, DispatchError, TransportError};
pub use session::{EnabledOperations, Operation, Phase, SessionState, Status, StatusKind};
pub use transport::{Connection, Transport};
