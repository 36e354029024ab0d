use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;
use tracing::debug;

use crate::error::{IptablesError, Result};
use crate::iface::{TABLE_FILTER, TABLE_MANGLE, TABLE_NAT};

/// Chains the kernel creates for each table; they can never be removed by a
/// restore that omits them.
static BUILTIN_CHAINS: LazyLock<HashMap<&'static str, HashSet<&'static str>>> =
    LazyLock::new(|| {
        HashMap::from([
            (TABLE_FILTER, HashSet::from(["INPUT", "FORWARD", "OUTPUT"])),
            (
                TABLE_NAT,
                HashSet::from(["PREROUTING", "INPUT", "OUTPUT", "POSTROUTING"]),
            ),
            (
                TABLE_MANGLE,
                HashSet::from(["PREROUTING", "INPUT", "FORWARD", "OUTPUT", "POSTROUTING"]),
            ),
        ])
    });

pub fn is_builtin_chain(table: &str, chain: &str) -> bool {
    BUILTIN_CHAINS
        .get(table)
        .is_some_and(|chains| chains.contains(chain))
}

#[derive(Debug, Clone, Serialize)]
pub struct Chain {
    pub name: String,
    pub rules: Vec<String>,
}

impl Chain {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rules: Vec::new(),
        }
    }

    /// Index of the first rule equal to `rule`.
    pub fn find_rule(&self, rule: &str) -> Option<usize> {
        self.rules.iter().position(|candidate| candidate == rule)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Table {
    pub name: String,
    pub chains: BTreeMap<String, Chain>,
}

impl Table {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            chains: BTreeMap::new(),
        }
    }
}

/// Tables keyed by name, each owning its chains and their ordered rules.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TableStore {
    tables: BTreeMap<String, Table>,
}

impl TableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding empty `filter` and `nat` tables, as on a fresh host.
    pub fn with_default_tables() -> Self {
        let mut store = Self::new();
        for name in [TABLE_FILTER, TABLE_NAT] {
            store.tables.insert(name.to_string(), Table::new(name));
        }
        store
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn get_table(&self, table: &str) -> Result<&Table> {
        self.tables
            .get(table)
            .ok_or_else(|| IptablesError::TableNotFound {
                table: table.to_string(),
            })
    }

    /// Looks up a chain, reporting which level is missing.
    pub fn get_chain(&self, table: &str, chain: &str) -> Result<(&Table, &Chain)> {
        let found = self.get_table(table)?;
        let chain = found
            .chains
            .get(chain)
            .ok_or_else(|| IptablesError::ChainNotFound {
                table: table.to_string(),
                chain: chain.to_string(),
            })?;
        Ok((found, chain))
    }

    pub(crate) fn get_chain_mut(&mut self, table: &str, chain: &str) -> Result<&mut Chain> {
        let found = self
            .tables
            .get_mut(table)
            .ok_or_else(|| IptablesError::TableNotFound {
                table: table.to_string(),
            })?;
        found
            .chains
            .get_mut(chain)
            .ok_or_else(|| IptablesError::ChainNotFound {
                table: table.to_string(),
                chain: chain.to_string(),
            })
    }

    /// Returns the chain, creating it and its table as needed, plus whether it
    /// already existed.
    pub(crate) fn ensure_chain_entry(&mut self, table: &str, chain: &str) -> (bool, &mut Chain) {
        let found = self
            .tables
            .entry(table.to_string())
            .or_insert_with(|| Table::new(table));

        let existed = found.chains.contains_key(chain);
        if !existed {
            debug!(table, chain, "creating chain");
        }

        let entry = found
            .chains
            .entry(chain.to_string())
            .or_insert_with(|| Chain::new(chain));
        (existed, entry)
    }

    pub fn ensure_chain(&mut self, table: &str, chain: &str) -> bool {
        self.ensure_chain_entry(table, chain).0
    }

    pub fn flush_chain(&mut self, table: &str, chain: &str) -> Result<()> {
        let found = self.get_chain_mut(table, chain)?;
        debug!(table, chain, rules = found.rules.len(), "flushing chain");
        found.rules.clear();
        Ok(())
    }

    pub fn delete_chain(&mut self, table: &str, chain: &str) -> Result<()> {
        self.get_chain(table, chain)?;
        if let Some(found) = self.tables.get_mut(table) {
            found.chains.remove(chain);
        }
        debug!(table, chain, "deleted chain");
        Ok(())
    }

    pub fn chain_exists(&self, table: &str, chain: &str) -> bool {
        self.get_chain(table, chain).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_distinguish_missing_table_from_missing_chain() {
        let store = TableStore::with_default_tables();

        assert!(matches!(
            store.get_chain("raw", "OUTPUT"),
            Err(IptablesError::TableNotFound { .. })
        ));
        assert!(matches!(
            store.get_chain("nat", "CRIO-HOSTPORTS"),
            Err(IptablesError::ChainNotFound { .. })
        ));
    }

    #[test]
    fn ensure_chain_creates_table_and_chain_once() {
        let mut store = TableStore::with_default_tables();

        assert!(!store.ensure_chain("mangle", "FORWARD"));
        assert!(store.ensure_chain("mangle", "FORWARD"));
        assert!(store.chain_exists("mangle", "FORWARD"));
        assert!(store.get_table("mangle").is_ok());
    }

    #[test]
    fn flush_and_delete_require_existing_chain() {
        let mut store = TableStore::with_default_tables();

        assert!(store.flush_chain("filter", "MISSING").is_err());
        assert!(store.delete_chain("filter", "MISSING").is_err());
        assert!(!store.chain_exists("filter", "MISSING"));

        let (_, chain) = store.ensure_chain_entry("filter", "KEEP");
        chain.rules.push("-j ACCEPT".to_string());
        store.flush_chain("filter", "KEEP").expect("flush");
        assert!(store.get_chain("filter", "KEEP").unwrap().1.rules.is_empty());

        store.delete_chain("filter", "KEEP").expect("delete");
        assert!(!store.chain_exists("filter", "KEEP"));
        // tables outlive their chains
        assert!(store.get_table("filter").is_ok());
    }

    #[test]
    fn builtin_chains_are_per_table() {
        assert!(is_builtin_chain("filter", "FORWARD"));
        assert!(!is_builtin_chain("nat", "FORWARD"));
        assert!(is_builtin_chain("mangle", "POSTROUTING"));
        assert!(!is_builtin_chain("nat", "CRIO-HOSTPORTS"));
        assert!(!is_builtin_chain("raw", "OUTPUT"));
    }
}
