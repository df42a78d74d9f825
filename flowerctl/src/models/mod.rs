//! Data model: install request, host facts, site manifest

pub mod facts;
pub mod manifest;
pub mod request;
