/*!
# pingwatch DevKit - Stubs and helpers for exercising the monitoring engine

Lets tests drive the kernel without raw sockets or a network:
- Scripted prober with per-address outcomes, delays and hangs
- Import/export fixtures
- Scenario harness wiring registry + hub + scheduler
*/

pub mod prober_stub;
pub mod fixtures;
pub mod test_utils;

// used by harness_test!
#[doc(hidden)]
pub use anyhow;

pub use prober_stub::{Behaviour, ScriptedProber};
pub use fixtures::{parse_export, ExportRow, ImportFileBuilder};
pub use test_utils::TestHarness;
