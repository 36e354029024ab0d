use std::fmt;
use std::str::FromStr;

use crate::error::{IptablesError, Result};

pub const TABLE_FILTER: &str = "filter";
pub const TABLE_NAT: &str = "nat";
pub const TABLE_MANGLE: &str = "mangle";

pub const CHAIN_PREROUTING: &str = "PREROUTING";
pub const CHAIN_POSTROUTING: &str = "POSTROUTING";
pub const CHAIN_OUTPUT: &str = "OUTPUT";

/// Where a new rule is placed in its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RulePosition {
    Prepend,
    Append,
}

impl RulePosition {
    pub fn as_flag(&self) -> &'static str {
        match self {
            Self::Prepend => "-I",
            Self::Append => "-A",
        }
    }
}

impl FromStr for RulePosition {
    type Err = IptablesError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "-I" | "prepend" => Ok(Self::Prepend),
            "-A" | "append" => Ok(Self::Append),
            other => Err(IptablesError::InvalidArgument {
                message: format!("unknown position argument {:?}", other),
            }),
        }
    }
}

impl fmt::Display for RulePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_flag())
    }
}

/// Whether a restore replaces the chains it names or merges into them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushFlag {
    FlushTables,
    NoFlushTables,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreCountersFlag {
    RestoreCounters,
    NoRestoreCounters,
}

/// Address family a backend operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    Ipv4,
    Ipv6,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ipv4 => "IPv4",
            Self::Ipv6 => "IPv6",
        }
    }
}

/// Control-plane operations of a packet-filtering backend.
///
/// Callers program against this trait so the in-memory model and a
/// tool-backed implementation are interchangeable. Implementations are not
/// internally synchronized; share one behind a mutex.
pub trait Iptables: Send {
    /// Creates the chain (and table) if missing. Returns whether it existed.
    fn ensure_chain(&mut self, table: &str, chain: &str) -> Result<bool>;

    /// Removes every rule from an existing chain.
    fn flush_chain(&mut self, table: &str, chain: &str) -> Result<()>;

    /// Removes an existing chain.
    fn delete_chain(&mut self, table: &str, chain: &str) -> Result<()>;

    fn chain_exists(&self, table: &str, chain: &str) -> bool;

    /// Adds a rule unless an equivalent one is present. Returns whether it existed.
    fn ensure_rule(
        &mut self,
        position: RulePosition,
        table: &str,
        chain: &str,
        args: &[&str],
    ) -> Result<bool>;

    /// Removes the first matching rule. Missing chains and rules are not errors.
    fn delete_rule(&mut self, table: &str, chain: &str, args: &[&str]) -> Result<()>;

    /// Appends the save-format rendering of `table` to `buffer`.
    fn save_into(&self, table: &str, buffer: &mut String) -> Result<()>;

    /// Replays a save-format stream, only honoring the section for `table`.
    fn restore(
        &mut self,
        table: &str,
        data: &[u8],
        flush: FlushFlag,
        counters: RestoreCountersFlag,
    ) -> Result<()>;

    /// Replays every table section of a save-format stream.
    fn restore_all(
        &mut self,
        data: &[u8],
        flush: FlushFlag,
        counters: RestoreCountersFlag,
    ) -> Result<()>;

    fn protocol(&self) -> Protocol;

    fn is_ipv6(&self) -> bool {
        self.protocol() == Protocol::Ipv6
    }

    /// Whether `--random-fully` is supported for masquerade rules.
    fn has_random_fully(&self) -> bool;

    /// Whether the backend is usable on this host.
    fn present(&self) -> bool;
}
