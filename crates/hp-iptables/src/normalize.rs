// Canonical rule form: bare addresses get an explicit prefix length, as iptables stores them

use std::net::IpAddr;

use crate::error::{IptablesError, Result};

const TO_DESTINATION_EQ: &str = "--to-destination=";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

/// Classifies a token as a bare IP literal. CIDRs and anything else yield `None`.
pub fn classify_address(token: &str) -> Option<AddressFamily> {
    match token.parse::<IpAddr>() {
        Ok(IpAddr::V4(_)) => Some(AddressFamily::Ipv4),
        // ::ffff:a.b.c.d is stored by iptables as the IPv4 address it wraps
        Ok(IpAddr::V6(v6)) if v6.to_ipv4_mapped().is_some() => Some(AddressFamily::Ipv4),
        Ok(IpAddr::V6(_)) => Some(AddressFamily::Ipv6),
        Err(_) => None,
    }
}

/// Quotes arguments with embedded whitespace and joins them into a rule string.
pub fn join_args(args: &[&str]) -> String {
    args.iter()
        .map(|arg| {
            if arg.contains(char::is_whitespace) {
                format!("\"{}\"", arg)
            } else {
                (*arg).to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Rewrites a rule into its canonical, single-space separated form.
pub fn normalize_rule(rule: &str) -> Result<String> {
    let mut normalized: Vec<String> = Vec::new();

    for token in tokenize(rule)? {
        match token.strip_prefix(TO_DESTINATION_EQ) {
            Some("") => {
                return Err(IptablesError::malformed(format!(
                    "--to-destination without a target in rule {:?}",
                    rule
                )));
            }
            Some(target) => {
                normalized.push("--to-destination".to_string());
                normalized.push(canonical_token(target));
            }
            None => normalized.push(canonical_token(token)),
        }
    }

    if normalized.is_empty() {
        return Err(IptablesError::malformed("empty rule"));
    }

    Ok(normalized.join(" "))
}

fn canonical_token(token: &str) -> String {
    match classify_address(token) {
        Some(AddressFamily::Ipv4) => format!("{}/32", token),
        Some(AddressFamily::Ipv6) => format!("{}/128", token),
        None => token.to_string(),
    }
}

/// Splits on spaces, keeping double-quoted spans together with their quotes.
fn tokenize(rule: &str) -> Result<Vec<&str>> {
    let mut tokens = Vec::new();
    let mut rest = rule.trim();

    while !rest.is_empty() {
        let end = match rest.strip_prefix('"') {
            Some(quoted) => {
                let close = quoted.find('"').ok_or_else(|| {
                    IptablesError::malformed(format!("mismatched quotes in rule {:?}", rule))
                })?;
                // opening quote + body + closing quote
                close + 2
            }
            None => rest.find(' ').unwrap_or(rest.len()),
        };

        tokens.push(&rest[..end]);
        rest = rest[end..].trim_start_matches(' ');
    }

    Ok(tokens)
}
