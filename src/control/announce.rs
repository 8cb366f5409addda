//! `$ready` announcement builder.
//!
//! The announcement is written to stdout once the listeners are bound, so a
//! supervising process learns where the worker is:
//! - The server URL (TCP address, prefix and token)
//! - The unix socket path
//! - The method catalogue
//! - Protocol version
//!
//! # Example
//!
//! ```
//! use catwire::control::build_announcement;
//! use catwire::handler::{MethodKind, Signature};
//!
//! let catalog = vec![Signature::public("meow").into_descriptor(MethodKind::Single)];
//! let line = build_announcement(Some("http://127.0.0.1:4000/t0k3n"), None, &catalog);
//! assert!(line.contains("$ready"));
//! ```

use std::io::Write;
use std::path::Path;

use serde_json::json;

use crate::handler::MethodDescriptor;

/// Protocol version announced to supervisors.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Method name of the announcement line.
pub const ANNOUNCEMENT_METHOD: &str = "$ready";

/// Build the announcement as one JSON line (without the newline).
///
/// Format:
/// ```json
/// {
///   "jsonrpc": "2.0",
///   "method": "$ready",
///   "params": {
///     "url": "http://127.0.0.1:4000/t0k3n",
///     "socket": "/tmp/catwire-42-ab.sock",
///     "methods": {
///       "meow": { "access": "public", "kind": "single", "params": [] }
///     },
///     "version": "1.0.0"
///   }
/// }
/// ```
pub fn build_announcement(
    url: Option<&str>,
    socket_path: Option<&Path>,
    catalog: &[MethodDescriptor],
) -> String {
    let methods: serde_json::Map<String, serde_json::Value> = catalog
        .iter()
        .map(|d| {
            (
                d.name.clone(),
                json!({
                    "access": d.access,
                    "kind": d.kind,
                    "params": d.params,
                }),
            )
        })
        .collect();

    let msg = json!({
        "jsonrpc": "2.0",
        "method": ANNOUNCEMENT_METHOD,
        "params": {
            "url": url,
            "socket": socket_path.map(|p| p.display().to_string()),
            "methods": methods,
            "version": PROTOCOL_VERSION
        }
    });

    msg.to_string()
}

/// Write the announcement line to `out` and flush.
///
/// The line ends in a bare `\n` whatever the platform. Stdout belongs to
/// the supervisor; logs go to stderr.
pub fn write_announcement<W: Write>(out: &mut W, line: &str) -> std::io::Result<()> {
    out.write_all(line.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()
}
