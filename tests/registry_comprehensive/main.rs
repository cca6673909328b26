//! Registry Comprehensive Test Suite
//!
//! End-to-end behavior of the recovery registry through the public API.
//!
//! ## Test Tiers
//!
//! - **Tier 1**: Handle lifecycle and scoped references
//! - **Tier 2**: Activity tracking and timeouts
//! - **Tier 3**: Cancellation completeness
//! - **Tier 4**: Reset identity and reference counting
//! - **Tier 5**: Concurrency and randomized operation sequences
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test registry_comprehensive
//! ```

// Test modules
mod test_utils;

// Tier 1: Handle Lifecycle
mod tier1_handle_lifecycle;


// Tier 3: Cancellation
mod tier3_cancellation;

// Tier 4: Reset
mod tier4_reset;
