#![allow(dead_code)]

mod fetch;

pub use fetch::*;
