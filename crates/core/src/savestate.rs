//! Save state (quick save / quick load).
//!
//! Captures the full machine state into a [`Snapshot`] and restores it, and
//! keeps one persisted save slot per game on disk (F5 save, F8 load in the
//! frontend).
//!
//! ## File format
//!
//! ```text
//! +------------------+
//! | Magic "NSST"     |  4 bytes
//! +------------------+
//! | Format version   |  u32 little-endian (currently 1)
//! +------------------+
//! | Payload length   |  u64 little-endian
//! +------------------+
//! | Payload          |  raw transfer-protocol bytes
//! +------------------+
//! ```
//!
//! The file carries no config id. A file written under another ROM is caught
//! by its payload length, not by an identity check.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::machine::Machine;
use crate::snapshot::Snapshot;
use crate::state::{measure, read_fields, write_fields};

/// Magic bytes identifying a save state file.
const MAGIC: [u8; 4] = *b"NSST";
/// Current save state format version.
const FORMAT_VERSION: u32 = 1;
/// Encoded header size: magic + version + payload length
pub const HEADER_SIZE: usize = 16;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct FileHeader {
    magic: [u8; 4],
    version: u32,
    payload_len: u64,
}

fn check_between_frames<M: Machine + ?Sized>(machine: &M, op: &str) {
    assert!(
        !machine.mid_frame(),
        "protocol misuse: {} called while a frame is executing",
        op
    );
}

/// Serialize the live machine into a new snapshot.
///
/// `frame_ticks` is the length of the frame that just completed. The
/// machine is not advanced.
///
/// # Panics
///
/// If the machine is in the middle of a frame.
pub fn capture<M: Machine + ?Sized>(machine: &mut M, frame_ticks: u32) -> Result<Snapshot, StateError> {
    check_between_frames(machine, "capture");
    let size = measure(machine);
    let mut payload = vec![0u8; size];
    write_fields(machine, &mut payload)?;
    Ok(Snapshot::new(payload, frame_ticks, machine.config_id()))
}

/// Load a snapshot into the live machine.
///
/// On any error the machine is left untouched.
///
/// # Panics
///
/// If the machine is in the middle of a frame.
pub fn restore<M: Machine + ?Sized>(machine: &mut M, snap: &Snapshot) -> Result<(), StateError> {
    check_between_frames(machine, "restore");
    let live = machine.config_id();
    if snap.config() != live {
        return Err(StateError::ConfigMismatch { snapshot: snap.config(), live });
    }
    read_fields(machine, snap.payload())
}

/// Write a snapshot in the save state file format.
pub fn persist<W: Write>(snap: &Snapshot, mut writer: W) -> Result<(), StateError> {
    let header = FileHeader { magic: MAGIC, version: FORMAT_VERSION, payload_len: snap.len() as u64 };
    let encoded = bincode::serialize(&header)
        .map_err(|e| StateError::Format(format!("header encode: {}", e)))?;
    debug_assert_eq!(encoded.len(), HEADER_SIZE);
    writer.write_all(&encoded)?;
    writer.write_all(snap.payload())?;
    writer.flush()?;
    Ok(())
}

/// Write a snapshot to `path`, replacing any previous file only once the
/// new one is complete.
pub fn persist_to_file(snap: &Snapshot, path: &Path) -> Result<(), StateError> {
    let tmp = temp_path(path);
    let written = File::create(&tmp)
        .map_err(StateError::from)
        .and_then(|file| persist(snap, BufWriter::new(file)))
        .and_then(|()| fs::rename(&tmp, path).map_err(StateError::from));
    if written.is_err() {
        // Leftover from a failed write; the old slot is untouched
        let _ = fs::remove_file(&tmp);
    }
    written
}

/// Sibling file a save is written to before it replaces the slot.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Read a persisted snapshot, validated against the live machine's size.
///
/// The returned snapshot is stamped with the live config and a frame length
/// of 0. The machine itself is not modified; pass the result to [`restore`].
pub fn load_persisted<M: Machine + ?Sized, R: Read>(mut reader: R, machine: &mut M) -> Result<Snapshot, StateError> {
    let mut raw = [0u8; HEADER_SIZE];
    reader.read_exact(&mut raw).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => StateError::Format("truncated header".into()),
        _ => StateError::Io(e),
    })?;
    let header: FileHeader = bincode::deserialize(&raw)
        .map_err(|e| StateError::Format(format!("header decode: {}", e)))?;

    if header.magic != MAGIC {
        return Err(StateError::Format("bad magic".into()));
    }
    if header.version != FORMAT_VERSION {
        return Err(StateError::Format(format!(
            "unsupported version {} (expected {})",
            header.version, FORMAT_VERSION
        )));
    }

    let expected = measure(machine);
    if header.payload_len != expected as u64 {
        return Err(StateError::CorruptState {
            expected,
            found: usize::try_from(header.payload_len).unwrap_or(usize::MAX),
        });
    }

    // One byte past the declared length is enough to detect trailing data
    let mut payload = Vec::with_capacity(expected);
    reader.take(expected as u64 + 1).read_to_end(&mut payload)?;
    if payload.len() != expected {
        return Err(StateError::CorruptState { expected, found: payload.len() });
    }

    Ok(Snapshot::new(payload, 0, machine.config_id()))
}

pub fn load_persisted_file<M: Machine + ?Sized>(path: &Path, machine: &mut M) -> Result<Snapshot, StateError> {
    let file = File::open(path)?;
    load_persisted(BufReader::new(file), machine)
}

/// Capture the machine and write it to the save slot at `path`.
pub fn save_state<M: Machine + ?Sized>(machine: &mut M, path: &Path) -> Result<(), StateError> {
    let snap = capture(machine, 0)?;
    persist_to_file(&snap, path)?;
    info!("Saved state to {} ({} bytes)", path.display(), snap.len());
    Ok(())
}

/// Read the save slot at `path` and restore it into the machine.
pub fn load_state<M: Machine + ?Sized>(machine: &mut M, path: &Path) -> Result<(), StateError> {
    let snap = load_persisted_file(path, machine).map_err(|e| {
        warn!("Rejected save state {}: {}", path.display(), e);
        e
    })?;
    restore(machine, &snap)?;
    info!("Loaded state from {}", path.display());
    Ok(())
}

/// Derive save state file path from game file path.
/// `game.nes` → `game.state`
pub fn state_path(game_path: &Path) -> PathBuf {
    let stem = game_path.file_stem().and_then(|s| s.to_str()).unwrap_or("game");
    let dir = game_path.parent().unwrap_or(Path::new("."));
    dir.join(format!("{}.state", stem))
}
