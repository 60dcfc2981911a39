pub mod config;
pub mod init;
pub mod log;
pub mod mission;
pub mod run;
pub mod safety;
pub mod task;

use anyhow::Context;
use uuid::Uuid;

pub fn parse_uuid(s: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(s.trim()).with_context(|| format!("'{s}' is not a mission UUID"))
}
