//! Access control: basic auth credentials and the IP allow-list

pub mod allow_list;
pub mod htpasswd;
