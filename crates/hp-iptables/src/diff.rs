use similar::{ChangeTag, TextDiff};

use crate::error::Result;
use crate::memory::MemIptables;

pub struct RulesetDiff {
    pub table: Option<String>,
    pub matches: bool,
    pub diff: Option<String>,
}

impl RulesetDiff {
    /// Which part of the ruleset was compared, for display.
    pub fn scope(&self) -> &str {
        self.table.as_deref().unwrap_or("all tables")
    }
}

/// Compares the save-format rendering of two engines, either for one table
/// or for all tables.
pub fn diff_rulesets(
    current: &MemIptables,
    desired: &MemIptables,
    table: Option<&str>,
) -> Result<RulesetDiff> {
    let (current_text, desired_text) = match table {
        Some(name) => (render_table(current, name)?, render_table(desired, name)?),
        None => (current.save_all(), desired.save_all()),
    };

    let matches = current_text == desired_text;
    Ok(RulesetDiff {
        table: table.map(str::to_string),
        matches,
        diff: (!matches).then(|| render_diff(&current_text, &desired_text)),
    })
}

/// Renders a table, treating a missing one as empty.
fn render_table(ipt: &MemIptables, table: &str) -> Result<String> {
    let mut out = String::new();
    match ipt.store().save_into(table, &mut out) {
        Ok(()) => Ok(out),
        Err(e) if e.is_not_found() => Ok(String::new()),
        Err(e) => Err(e),
    }
}

fn render_diff(current: &str, desired: &str) -> String {
    let diff = TextDiff::from_lines(current, desired);
    let mut output = String::new();

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => '-',
            ChangeTag::Insert => '+',
            ChangeTag::Equal => ' ',
        };
        output.push(sign);
        output.push_str(change.value());
    }

    output
}
