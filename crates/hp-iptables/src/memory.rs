use tracing::debug;

use crate::error::Result;
use crate::iface::{FlushFlag, Iptables, Protocol, RestoreCountersFlag, RulePosition};
use crate::normalize::join_args;
use crate::restore::RestoreParser;
use crate::table::TableStore;

/// In-memory iptables model with the same control-plane behavior as the
/// real tool. Used for dry runs, offline state manipulation and tests.
#[derive(Debug, Clone)]
pub struct MemIptables {
    store: TableStore,
    protocol: Protocol,
}

impl MemIptables {
    pub fn new() -> Self {
        Self::with_protocol(Protocol::Ipv4)
    }

    pub fn with_protocol(protocol: Protocol) -> Self {
        Self {
            store: TableStore::with_default_tables(),
            protocol,
        }
    }

    pub fn store(&self) -> &TableStore {
        &self.store
    }

    /// Save-format rendering of every table.
    pub fn save_all(&self) -> String {
        self.store.save_all()
    }

    /// Rules of a chain in evaluation order, if the chain exists.
    pub fn rules(&self, table: &str, chain: &str) -> Option<&[String]> {
        self.store
            .get_chain(table, chain)
            .ok()
            .map(|(_, chain)| chain.rules.as_slice())
    }
}

impl Default for MemIptables {
    fn default() -> Self {
        Self::new()
    }
}

impl Iptables for MemIptables {
    fn ensure_chain(&mut self, table: &str, chain: &str) -> Result<bool> {
        Ok(self.store.ensure_chain(table, chain))
    }

    fn flush_chain(&mut self, table: &str, chain: &str) -> Result<()> {
        self.store.flush_chain(table, chain)
    }

    fn delete_chain(&mut self, table: &str, chain: &str) -> Result<()> {
        self.store.delete_chain(table, chain)
    }

    fn chain_exists(&self, table: &str, chain: &str) -> bool {
        self.store.chain_exists(table, chain)
    }

    fn ensure_rule(
        &mut self,
        position: RulePosition,
        table: &str,
        chain: &str,
        args: &[&str],
    ) -> Result<bool> {
        self.store
            .ensure_rule(position, table, chain, &join_args(args))
    }

    fn delete_rule(&mut self, table: &str, chain: &str, args: &[&str]) -> Result<()> {
        self.store.delete_rule(table, chain, &args.join(" "));
        Ok(())
    }

    fn save_into(&self, table: &str, buffer: &mut String) -> Result<()> {
        self.store.save_into(table, buffer)
    }

    fn restore(
        &mut self,
        table: &str,
        data: &[u8],
        flush: FlushFlag,
        _counters: RestoreCountersFlag,
    ) -> Result<()> {
        debug!(table, bytes = data.len(), ?flush, "restoring table");
        RestoreParser::new(&mut self.store, Some(table), flush).run(data)
    }

    fn restore_all(
        &mut self,
        data: &[u8],
        flush: FlushFlag,
        _counters: RestoreCountersFlag,
    ) -> Result<()> {
        debug!(bytes = data.len(), ?flush, "restoring all tables");
        RestoreParser::new(&mut self.store, None, flush).run(data)
    }

    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn has_random_fully(&self) -> bool {
        false
    }

    fn present(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IptablesError;

    #[test]
    fn quoted_comment_is_stored_once() {
        let mut ipt = MemIptables::new();
        let args = ["-m", "comment", "--comment", "my rule", "-j", "LOG"];

        assert!(!ipt.ensure_rule(RulePosition::Append, "filter", "LOG", &args).unwrap());
        assert!(ipt.ensure_rule(RulePosition::Append, "filter", "LOG", &args).unwrap());
        assert_eq!(
            ipt.rules("filter", "LOG").unwrap(),
            ["-m comment --comment \"my rule\" -j LOG"]
        );
    }

    #[test]
    fn metadata_reflects_protocol() {
        let v4 = MemIptables::new();
        assert!(!v4.is_ipv6());
        assert!(v4.present());
        assert!(!v4.has_random_fully());

        let v6 = MemIptables::with_protocol(Protocol::Ipv6);
        assert!(v6.is_ipv6());
        assert_eq!(v6.protocol().as_str(), "IPv6");
    }

    #[test]
    fn strict_lookups_and_lenient_deletes() {
        let mut ipt = MemIptables::new();
        assert!(matches!(
            ipt.flush_chain("nat", "CRIO-HOSTPORTS"),
            Err(IptablesError::ChainNotFound { .. })
        ));
        assert!(ipt.delete_chain("raw", "X").unwrap_err().is_not_found());
        assert!(ipt.delete_rule("nat", "CRIO-HOSTPORTS", &["-j", "X"]).is_ok());
        assert!(!ipt.chain_exists("nat", "CRIO-HOSTPORTS"));
    }

    #[test]
    fn usable_as_trait_object() {
        let mut boxed: Box<dyn Iptables> = Box::new(MemIptables::new());
        assert!(!boxed.ensure_chain("nat", "CRIO-HOSTPORTS").unwrap());
        assert!(boxed.chain_exists("nat", "CRIO-HOSTPORTS"));
    }
}
