#![forbid(unsafe_code)]

pub mod document_store;
pub mod repo;
