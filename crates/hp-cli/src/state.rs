use anyhow::{Context, Result};
use hp_core::IpFamily;
use hp_iptables::{FlushFlag, Iptables, MemIptables, Protocol, RestoreCountersFlag};
use std::path::Path;
use tracing::debug;

pub fn protocol_for(family: IpFamily) -> Protocol {
    match family {
        IpFamily::Ipv4 => Protocol::Ipv4,
        IpFamily::Ipv6 => Protocol::Ipv6,
    }
}

/// Rebuilds an engine from a save-format file. A missing file yields a fresh
/// engine.
pub fn load_engine(path: &Path, family: IpFamily) -> Result<MemIptables> {
    let mut ipt = MemIptables::with_protocol(protocol_for(family));

    if !path.exists() {
        debug!(path = %path.display(), "no state file, starting empty");
        return Ok(ipt);
    }

    let data = std::fs::read(path).with_context(|| format!("Failed to read state from {:?}", path))?;
    ipt.restore_all(&data, FlushFlag::NoFlushTables, RestoreCountersFlag::NoRestoreCounters)
        .with_context(|| format!("Failed to restore state from {:?}", path))?;

    Ok(ipt)
}

/// Replays a restore stream into a fresh engine, returning it on success.
pub fn replay_file(path: &Path, table: Option<&str>, family: IpFamily) -> Result<MemIptables> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    let mut ipt = MemIptables::with_protocol(protocol_for(family));

    let result = match table {
        Some(table) => ipt.restore(
            table,
            &data,
            FlushFlag::NoFlushTables,
            RestoreCountersFlag::NoRestoreCounters,
        ),
        None => ipt.restore_all(&data, FlushFlag::NoFlushTables, RestoreCountersFlag::NoRestoreCounters),
    };
    result.with_context(|| format!("Invalid restore data in {:?}", path))?;

    Ok(ipt)
}

pub fn persist_engine(ipt: &MemIptables, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create state directory {:?}", parent))?;
        }
    }

    std::fs::write(path, ipt.save_all())
        .with_context(|| format!("Failed to write state to {:?}", path))?;
    debug!(path = %path.display(), "state persisted");
    Ok(())
}
