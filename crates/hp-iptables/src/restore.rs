// iptables-restore replay; not atomic, a failed line leaves earlier lines applied

use std::collections::HashSet;
use tracing::{debug, trace};

use crate::error::{IptablesError, Result};
use crate::iface::{FlushFlag, RulePosition};
use crate::table::{TableStore, is_builtin_chain};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State<'a> {
    OutsideTable,
    InTable(&'a str),
    /// Inside a table excluded by the filter.
    Skipping,
}

pub(crate) struct RestoreParser<'a> {
    store: &'a mut TableStore,
    table_filter: Option<&'a str>,
    flush: FlushFlag,
}

impl<'a> RestoreParser<'a> {
    pub(crate) fn new(
        store: &'a mut TableStore,
        table_filter: Option<&'a str>,
        flush: FlushFlag,
    ) -> Self {
        Self {
            store,
            table_filter,
            flush,
        }
    }

    pub(crate) fn run(mut self, data: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(data)
            .map_err(|e| IptablesError::malformed(format!("restore data is not text: {}", e)))?;

        let deleted = deleted_chains(text);
        let mut state = State::OutsideTable;

        for line in text.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(name) = line.strip_prefix('*') {
                state = match self.table_filter {
                    Some(filter) if filter != name => State::Skipping,
                    _ => State::InTable(name),
                };
                trace!(table = name, ?state, "entering table");
                continue;
            }

            let State::InTable(table) = state else {
                trace!(line, "ignoring line outside selected table");
                continue;
            };

            if let Some(header) = line.strip_prefix(':') {
                self.declare_chain(table, header, &deleted)?;
                continue;
            }

            if line == "COMMIT" {
                if self.table_filter == Some(table) {
                    debug!(table, "restore of filtered table committed");
                    return Ok(());
                }
                state = State::OutsideTable;
                continue;
            }

            let parts: Vec<&str> = line.split(' ').collect();
            match parts[0] {
                "-A" | "-I" => {
                    if parts.len() < 3 {
                        return Err(invalid_rule(line));
                    }
                    let position = parts[0].parse::<RulePosition>()?;
                    let rule = parts[2..].join(" ");
                    self.store.ensure_rule(position, table, parts[1], &rule)?;
                }
                "-X" => {
                    if parts.len() < 2 {
                        return Err(invalid_rule(line));
                    }
                    self.store.delete_chain(table, parts[1])?;
                }
                _ => trace!(line, "ignoring unrecognized line"),
            }
        }

        Ok(())
    }

    fn declare_chain(&mut self, table: &str, header: &str, deleted: &HashSet<&str>) -> Result<()> {
        let chain = header.split(' ').next().unwrap_or_default();
        if chain.is_empty() {
            return Err(IptablesError::malformed(format!(
                "chain declaration without a name: ':{}'",
                header
            )));
        }

        if self.flush == FlushFlag::FlushTables && self.store.chain_exists(table, chain) {
            self.store.delete_chain(table, chain)?;
        }

        self.store.ensure_chain(table, chain);

        // --noflush only spares builtin chains; a declared user chain is
        // emptied unless the same input deletes it
        if !is_builtin_chain(table, chain) && !deleted.contains(chain) {
            self.store.flush_chain(table, chain)?;
        }

        Ok(())
    }
}

fn invalid_rule(line: &str) -> IptablesError {
    IptablesError::malformed(format!("invalid iptables rule '{}'", line))
}

/// Chains named by a `-X` line anywhere in the input.
fn deleted_chains(text: &str) -> HashSet<&str> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split(' ');
            match (fields.next(), fields.next()) {
                (Some("-X"), Some(chain)) if !chain.is_empty() => Some(chain),
                _ => None,
            }
        })
        .collect()
}
