use std::collections::HashSet;
use std::fmt;
use std::io::BufRead;

use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::CollectorError;
use crate::util;

// ------------------------------------------------------------
// Descriptor grammar
// ------------------------------------------------------------
//
// instance/memberClass/memberCode/serverCode/address
//
// The first four fields never contain '/'. The address is the
// remainder of the line and may contain '/'.
//
static DESCRIPTOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([^/]+)/([^/]+)/([^/]+)/([^/]+)/(.+)$").expect("static regex")
});

/// Identity of one security server in the federation.
///
/// The raw descriptor is the cursor key; the normalized token names the
/// output sink and tags diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerIdentity {
    descriptor: String,
    normalized: String,
    x_road_instance: String,
    member_class: String,
    member_code: String,
    server_code: String,
    address: String,
}

impl ServerIdentity {
    /// Parses one descriptor line. Surrounding whitespace is ignored.
    pub fn parse(line: &str) -> Result<Self, CollectorError> {
        let descriptor = line.trim();
        let caps = DESCRIPTOR
            .captures(descriptor)
            .ok_or_else(|| CollectorError::MalformedIdentity {
                line: descriptor.to_string(),
            })?;

        Ok(Self {
            descriptor: descriptor.to_string(),
            normalized: util::normalize_name(descriptor),
            x_road_instance: caps[1].to_string(),
            member_class: caps[2].to_string(),
            member_code: caps[3].to_string(),
            server_code: caps[4].to_string(),
            address: caps[5].to_string(),
        })
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// File- and log-safe form of the descriptor.
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    pub fn x_road_instance(&self) -> &str {
        &self.x_road_instance
    }

    pub fn member_class(&self) -> &str {
        &self.member_class
    }

    pub fn member_code(&self) -> &str {
        &self.member_code
    }

    pub fn server_code(&self) -> &str {
        &self.server_code
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

/// Reads a newline-delimited server list.
///
/// Blank lines are skipped silently. Malformed lines, including lines
/// that are not valid UTF-8, are reported and skipped. Repeated
/// descriptors keep only their first occurrence. Only a read error on
/// the stream itself is returned as an error.
///
/// RETURNS:
/// - the accepted identities in input order
/// - the number of rejected lines
pub fn parse_server_list<R: BufRead>(reader: R) -> std::io::Result<(Vec<ServerIdentity>, usize)> {
    let mut servers = Vec::new();
    let mut seen = HashSet::new();
    let mut rejected = 0;

    for (n, raw) in reader.split(b'\n').enumerate() {
        let raw = raw?;
        let line = match String::from_utf8(raw) {
            Ok(line) => line,
            Err(e) => {
                warn!(
                    "Malformed server string on line {}: {}",
                    n + 1,
                    String::from_utf8_lossy(e.as_bytes()).trim()
                );
                rejected += 1;
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match ServerIdentity::parse(&line) {
            Ok(identity) => {
                if seen.insert(identity.descriptor().to_string()) {
                    servers.push(identity);
                } else {
                    warn!("[{}] duplicate server string ignored", identity);
                }
            }
            Err(e) => {
                warn!("{}", e);
                rejected += 1;
            }
        }
    }

    Ok((servers, rejected))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_five_fields() {
        let id = ServerIdentity::parse("XTEE-CI/GOV/00000000/00000000_1/xtee8.ci.kit\n").unwrap();
        assert_eq!(id.x_road_instance(), "XTEE-CI");
        assert_eq!(id.member_class(), "GOV");
        assert_eq!(id.member_code(), "00000000");
        assert_eq!(id.server_code(), "00000000_1");
        assert_eq!(id.address(), "xtee8.ci.kit");
        assert_eq!(id.descriptor(), "XTEE-CI/GOV/00000000/00000000_1/xtee8.ci.kit");
        assert_eq!(id.normalized(), "XTEE-CI.GOV.00000000.00000000.1.xtee8.ci.kit");
    }

    #[test]
    fn address_absorbs_remaining_slashes() {
        let id = ServerIdentity::parse("EE/COM/123/ss/http://host:8080/path").unwrap();
        assert_eq!(id.server_code(), "ss");
        assert_eq!(id.address(), "http://host:8080/path");
    }

    #[test]
    fn normalized_token_is_safe() {
        let inputs = [
            "EE/GOV/70000310/ss 1/host",
            "ee-dev/COM/ÄÖ/srv#2/a/b?c=d",
            "x/y/z/w/...---",
        ];
        for raw in inputs {
            let id = ServerIdentity::parse(raw).unwrap();
            assert!(
                id.normalized()
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-'),
                "{} -> {}",
                raw,
                id.normalized()
            );
        }
    }

    #[test]
    fn rejects_wrong_field_count() {
        for raw in ["", "EE/GOV/123/ss", "EE/GOV//ss/host", "/GOV/123/ss/host", "EE/GOV/123/ss/"] {
            assert!(
                matches!(
                    ServerIdentity::parse(raw),
                    Err(CollectorError::MalformedIdentity { .. })
                ),
                "{:?} should be rejected",
                raw
            );
        }
    }

    #[test]
    fn server_list_skips_bad_and_duplicate_lines() {
        let input = "EE/GOV/1/ss1/a\nbroken line\n\nEE/GOV/2/ss2/b\nEE/GOV/1/ss1/a\n";
        let (servers, rejected) = parse_server_list(input.as_bytes()).unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(rejected, 1);
        assert_eq!(servers[0].member_code(), "1");
        assert_eq!(servers[1].member_code(), "2");
    }

    #[test]
    fn server_list_skips_invalid_utf8_line() {
        let input: &[u8] = b"EE/GOV/1/ss1/a\nEE/GOV/\xff\xfe/ss/bad\nEE/GOV/2/ss2/b\n";
        let (servers, rejected) = parse_server_list(input).unwrap();
        assert_eq!(rejected, 1);
        let codes: Vec<_> = servers.iter().map(|s| s.member_code()).collect();
        assert_eq!(codes, ["1", "2"]);
    }

    #[test]
    fn server_list_accepts_crlf_and_missing_final_newline() {
        let (servers, rejected) = parse_server_list(&b"EE/GOV/1/ss1/a\r\nEE/GOV/2/ss2/b"[..]).unwrap();
        assert_eq!(rejected, 0);
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].address(), "a");
    }
}
