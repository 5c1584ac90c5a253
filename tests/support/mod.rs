#![allow(unused_imports)]
#![allow(dead_code)]

mod dirs;
mod http_utils;
mod logging;
mod net;
mod origin;

pub use dirs::TestDirs;
pub use harness::{ProxyHarness, ProxyHarnessBuilder};
pub use http_utils::{HttpResponse, get, send_raw};
pub use logging::LogCapture;
pub use net::{find_free_port, wait_for_listener};
pub use origin::{MockArtifact, MockOrigin};

/// Deterministic artifact bytes that make misplaced offsets visible.
pub fn artifact_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|idx| (idx % 251) as u8).collect()
}
