//! Integration test suite, built as one test binary.

mod mock_page;
mod poll_cycle;
