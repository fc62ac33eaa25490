//! Shared constants for end-to-end tests

// ============================================================================
// Clients
// ============================================================================

/// Client id used by most tests
pub const TEST_CLIENT: &str = "test-client";

/// A second, independent client
pub const OTHER_CLIENT: &str = "other-client";

// ============================================================================
// Test tools
// ============================================================================

/// Cacheable tool that counts how often its handler actually ran
pub const COUNTED_TOOL: &str = "test.counted";

/// Always fails with [`FAILING_TOOL_MESSAGE`]
pub const FAILING_TOOL: &str = "test.failing";
pub const FAILING_TOOL_MESSAGE: &str = "script not found: act3.fountain";

/// Pushes [`SCENE_COUNT`] chunks through its stream writer, one every
/// [`SCENE_DELAY_MS`]
pub const SCENES_TOOL: &str = "test.scenes";
pub const SCENE_COUNT: u64 = 3;
pub const SCENE_DELAY_MS: u64 = 200;

// ============================================================================
// Timeouts
// ============================================================================

/// Per-request timeout for the HTTP client
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// How long to wait for the server to come up
pub const SERVER_READY_TIMEOUT_MS: u64 = 5_000;

/// Delay between readiness polls
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 20;
