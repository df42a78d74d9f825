//! IP allow-list parsing and rendering

use std::fmt;
use std::net::IpAddr;

use ipnet::IpNet;

use crate::errors::AuthError;

/// One allow-list entry: a single address or a network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllowEntry {
    Addr(IpAddr),
    Net(IpNet),
}

impl fmt::Display for AllowEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllowEntry::Addr(addr) => write!(f, "{}", addr),
            AllowEntry::Net(net) => write!(f, "{}", net),
        }
    }
}

impl AllowEntry {
    /// Parse an address or CIDR block. Host bits of a network are cleared.
    pub fn parse(raw: &str) -> Option<Self> {
        if let Ok(addr) = raw.parse::<IpAddr>() {
            return Some(AllowEntry::Addr(addr));
        }
        raw.parse::<IpNet>().ok().map(|net| AllowEntry::Net(net.trunc()))
    }
}

/// A validated, de-duplicated allow-list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    entries: Vec<AllowEntry>,
}

impl AllowList {
    pub fn entries(&self) -> &[AllowEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries as strings, in input order
    pub fn to_strings(&self) -> Vec<String> {
        self.entries.iter().map(ToString::to_string).collect()
    }

    /// Nginx `allow` lines followed by `deny all`, indented for a location
    /// block. Empty when the list is empty.
    pub fn nginx_fragment(&self, indent: &str) -> String {
        if self.is_empty() {
            return String::new();
        }
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&format!("{}allow {};\n", indent, entry));
        }
        out.push_str(&format!("{}deny all;\n", indent));
        out
    }

    /// Apache `Require ip` line. Empty when the list is empty.
    pub fn apache_fragment(&self, indent: &str) -> String {
        if self.is_empty() {
            return String::new();
        }
        format!("{}Require ip {}\n", indent, self.to_strings().join(" "))
    }
}

/// Validate every entry. Any malformed entry rejects the whole list, and the
/// error names all offending entries.
pub fn set_ip_allow_list<S: AsRef<str>>(ips: &[S]) -> Result<AllowList, AuthError> {
    let mut entries: Vec<AllowEntry> = Vec::with_capacity(ips.len());
    let mut invalid = Vec::new();

    for raw in ips {
        let raw = raw.as_ref().trim();
        if raw.is_empty() {
            continue;
        }
        match AllowEntry::parse(raw) {
            Some(entry) => {
                if !entries.contains(&entry) {
                    entries.push(entry);
                }
            }
            None => invalid.push(raw.to_string()),
        }
    }

    if !invalid.is_empty() {
        return Err(AuthError::invalid_ips(invalid));
    }

    Ok(AllowList { entries })
}
