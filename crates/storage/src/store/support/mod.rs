#![forbid(unsafe_code)]

mod schema;
mod time;

pub(super) use schema::{install_schema, preflight_gate};
pub(super) use time::now_ms;
