//! Test-only mock servers for integration-testing the forwarders (C7)
//! against a live listener instead of a fake transport trait object.
//!
//! Grounded in `rt-test-utils::mock_ws_server`'s "bind on a random port,
//! hand back the bound address, accept in a background task" pattern —
//! applied to a mock HTTP target instead of a WebSocket endpoint, since
//! that's the protocol scenario 4 of spec.md §8 (forwarder retry) needs.

pub mod mock_http_target;

pub use mock_http_target::MockHttpTarget;
