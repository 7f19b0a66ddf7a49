//! Process-level helpers shared by the webhook binary: logging setup and the
//! build version string.

pub mod logging;
pub mod version;
