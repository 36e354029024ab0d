use tracing::debug;

use crate::error::Result;
use crate::iface::RulePosition;
use crate::normalize::normalize_rule;
use crate::table::TableStore;

impl TableStore {
    /// Inserts a rule given as a single string, unless its canonical form is
    /// already present. The chain is created on demand.
    pub fn ensure_rule(
        &mut self,
        position: RulePosition,
        table: &str,
        chain: &str,
        rule: &str,
    ) -> Result<bool> {
        // normalize first so a rejected rule leaves the store untouched
        let rule = normalize_rule(rule)?;
        let (_, entry) = self.ensure_chain_entry(table, chain);

        if entry.find_rule(&rule).is_some() {
            return Ok(true);
        }

        debug!(table, chain, %position, rule = rule.as_str(), "adding rule");
        match position {
            RulePosition::Prepend => entry.rules.insert(0, rule),
            RulePosition::Append => entry.rules.push(rule),
        }

        Ok(false)
    }

    /// Removes the first rule literally equal to `rule`. Missing chains and
    /// rules are treated as already deleted.
    pub fn delete_rule(&mut self, table: &str, chain: &str, rule: &str) {
        let Ok(entry) = self.get_chain_mut(table, chain) else {
            return;
        };

        if let Some(idx) = entry.find_rule(rule) {
            entry.rules.remove(idx);
            debug!(table, chain, rule, "deleted rule");
        }
    }
}
