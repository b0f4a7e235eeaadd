//! Small helpers shared across the crate.

mod math;

pub(crate) use math::{align_to, to_u32};
