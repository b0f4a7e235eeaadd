pub mod common;
pub mod inspect;
pub mod patch;
pub mod unpatch;
