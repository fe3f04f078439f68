//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises one part of the port
//! runtime against mock adapters.  Everything runs on the host with no
//! real hardware required.

mod core_tests;
mod mock_hw;
mod propagation_tests;
mod runner_tests;
mod sequence_tests;
