//! Control plane module - the startup announcement.
//!
//! A worker started by a supervisor reports where it listens with one JSON
//! line on stdout. Everything after that happens on the sockets.
//!
//! # Workflow
//!
//! 1. Worker binds its TCP and unix listeners
//! 2. Worker writes `$ready` to stdout
//! 3. Supervisor reads the URL and socket path
//! 4. Clients connect and call methods
//!
//! # Example
//!
//! ```no_run
//! use catwire::control::{build_announcement, write_announcement};
//!
//! let line = build_announcement(Some("http://127.0.0.1:4000/t0k3n"), None, &[]);
//! write_announcement(&mut std::io::stdout().lock(), &line)?;
//! # Ok::<(), std::io::Error>(())
//! ```

mod announce;

pub use announce::{
    build_announcement, write_announcement, ANNOUNCEMENT_METHOD, PROTOCOL_VERSION,
};
