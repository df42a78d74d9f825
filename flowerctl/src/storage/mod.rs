//! Host layout and installer settings

pub mod layout;
pub mod settings;
