//! # Signature Tracker Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── benches/          # Cache and stats throughput
//! └── src/integration/  # Tracker-level scenarios
//!     ├── scenarios.rs  # Ingestion, stats and dedupe end to end
//!     └── live_feed.rs  # Subscription ordering through the dispatcher
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p fp-tests
//! cargo bench -p fp-tests
//! ```

pub mod integration;
