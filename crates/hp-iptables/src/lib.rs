// In-memory iptables model, save/restore protocol and host-port rules
pub mod diff;
pub mod error;
pub mod hostport;
pub mod iface;
pub mod memory;
pub mod normalize;
mod restore;
mod rules;
mod save;
pub mod table;

pub use diff::{RulesetDiff, diff_rulesets};
pub use error::{IptablesError, Result};
pub use hostport::*;
pub use iface::*;
pub use memory::MemIptables;
pub use normalize::{AddressFamily, classify_address, normalize_rule};
pub use table::{Chain, Table, TableStore, is_builtin_chain};
