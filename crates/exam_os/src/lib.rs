#![forbid(unsafe_code)]

pub mod blueprint;
pub mod controller;
pub mod view;
