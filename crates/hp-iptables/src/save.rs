use std::fmt::Write;

use crate::error::Result;
use crate::table::{Chain, TableStore};

fn save_chain(chain: &Chain, out: &mut String) {
    for rule in &chain.rules {
        let _ = writeln!(out, "-A {} {}", chain.name, rule);
    }
}

impl TableStore {
    /// Renders `table` in iptables-save format. All chain headers come before
    /// any rule; counters are always zero.
    pub fn save_into(&self, table: &str, buffer: &mut String) -> Result<()> {
        let found = self.get_table(table)?;

        let _ = writeln!(buffer, "*{}", found.name);

        let mut rules = String::new();
        for chain in found.chains.values() {
            let _ = writeln!(buffer, ":{} - [0:0]", chain.name);
            save_chain(chain, &mut rules);
        }

        buffer.push_str(&rules);
        buffer.push_str("COMMIT\n");
        Ok(())
    }

    /// Renders every table, in name order.
    pub fn save_all(&self) -> String {
        let mut buffer = String::new();
        for name in self.table_names() {
            // names come from the store itself
            let _ = self.save_into(name, &mut buffer);
        }
        buffer
    }
}
