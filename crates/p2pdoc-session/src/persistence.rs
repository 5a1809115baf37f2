//! Persistence (spec §6, §9): the human-readable plain-text autosave file,
//! plus a binary crash-recovery snapshot pairing `DocCRDT`'s characters with
//! `CausalBus`'s `(T, D)` (the "owned persistence handle" per §9's
//! ETS-table analogy).

use std::path::Path;

use serde::{Deserialize, Serialize};

use p2pdoc_clock::VectorClock;
use p2pdoc_core::{Char, FatalResourceError};

/// Overwrite the autosave file with the current plain-text projection. No
/// header, no versioning, UTF-8 only, matching §6 exactly.
pub fn write_autosave(path: &Path, content: &str) -> Result<(), FatalResourceError> {
    if let Some(dir) = path.parent() {
        let _ = std::fs::create_dir_all(dir);
    }
    std::fs::write(path, content).map_err(|e| FatalResourceError::AutosaveFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

#[derive(Serialize, Deserialize)]
struct StateSnapshot {
    chars: Vec<Char>,
    t: VectorClock,
    d: VectorClock,
}

/// Write the binary crash-recovery snapshot. Distinct from the plain-text
/// autosave: this is never read by anything but this peer's own restart
/// path.
pub fn write_state_snapshot(
    path: &Path,
    chars: &[Char],
    t: &VectorClock,
    d: &VectorClock,
) -> Result<(), FatalResourceError> {
    let snapshot = StateSnapshot {
        chars: chars.to_vec(),
        t: t.clone(),
        d: d.clone(),
    };
    let bytes = bincode::serialize(&snapshot).map_err(|e| FatalResourceError::AutosaveFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    if let Some(dir) = path.parent() {
        let _ = std::fs::create_dir_all(dir);
    }
    std::fs::write(path, bytes).map_err(|e| FatalResourceError::AutosaveFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Read a crash-recovery snapshot written by [`write_state_snapshot`].
/// Returns `None` if absent or unreadable — the caller falls back to the
/// empty initial state, per §7's propagation policy for crashed actors.
pub fn read_state_snapshot(path: &Path) -> Option<(Vec<Char>, VectorClock, VectorClock)> {
    let bytes = std::fs::read(path).ok()?;
    let snapshot: StateSnapshot = bincode::deserialize(&bytes).ok()?;
    Some((snapshot.chars, snapshot.t, snapshot.d))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_snapshot_round_trips() {
        let dir = std::env::temp_dir().join(format!(
            "p2pdoc-session-test-{:?}",
            std::thread::current().id()
        ));
        let path = dir.join("a_1_1_1_1.state");

        let t = VectorClock::new().increment(&p2pdoc_core::PeerId::new_unchecked("a@1.1.1.1"));
        let d = VectorClock::new();
        write_state_snapshot(&path, &[], &t, &d).unwrap();

        let (chars, t2, d2) = read_state_snapshot(&path).unwrap();
        assert!(chars.is_empty());
        assert_eq!(t, t2);
        assert_eq!(d, d2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_snapshot_reads_as_none() {
        assert!(read_state_snapshot(Path::new("/nonexistent/path.state")).is_none());
    }
}
