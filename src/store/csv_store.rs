//! File-backed packet log.
//!
//! Rows live in `packets.csv` under the data directory, one per line:
//! `id,session_id,protocol,source_ip,dest_ip,size_bytes,timestamp`.
//! Writers hold an exclusive `flock` while appending, readers a shared one.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

use super::{PacketLogEntry, PacketStats, PacketStore};
use crate::domain::{CapturedPacket, Protocol, SessionId};
use crate::error::StoreError;

/// File name of the packet log inside the data directory.
pub const PACKET_LOG_FILE: &str = "packets.csv";

/// Bytes read from the end of the log to find the last id. Rows are
/// well under this even with two IPv6 addresses.
const TAIL_BYTES: u64 = 1024;

/// Append-only CSV packet log.
#[derive(Debug, Clone)]
pub struct CsvStore {
    path: PathBuf,
}

impl CsvStore {
    /// Use `packets.csv` inside `data_dir`, creating the directory if needed.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(data_dir)?;
        Ok(Self {
            path: data_dir.join(PACKET_LOG_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every row, oldest first.
    pub fn read_entries(&self) -> Result<Vec<PacketLogEntry>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)?;
        let _lock = FileLock::shared(&file)?;

        let mut reader = BufReader::new(&file);
        let mut entries = Vec::new();
        let mut line = String::new();
        let mut line_no = 0;
        while reader.read_line(&mut line)? > 0 {
            line_no += 1;
            // A row without its newline is a torn write; the next record drops it
            if !line.ends_with('\n') {
                tracing::warn!("Ignoring partial row at packet log line {}", line_no);
                break;
            }
            let row = line.trim();
            if !row.is_empty() {
                entries.push(from_csv_line(row, line_no)?);
            }
            line.clear();
        }

        Ok(entries)
    }
}

impl PacketStore for CsvStore {
    fn record(&self, packet: &CapturedPacket) -> Result<(), StoreError> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)?;

        let _lock = FileLock::exclusive(&file)?;

        let tail = read_tail(&mut file)?;
        if tail.torn > 0 {
            tracing::warn!("Discarding {} bytes of a partial packet log row", tail.torn);
            let len = file.metadata()?.len();
            file.set_len(len - tail.torn)?;
        }

        let id = tail.last_id + 1;
        let entry = PacketLogEntry::from_packet(id, packet);
        writeln!(file, "{}", to_csv_line(&entry))?;
        file.flush()?;

        Ok(())
    }

    fn query(&self, session: Option<SessionId>, limit: usize) -> Result<PacketStats, StoreError> {
        let entries = self.read_entries()?;
        Ok(PacketStats::aggregate(&entries, session, limit))
    }
}

fn to_csv_line(entry: &PacketLogEntry) -> String {
    format!(
        "{},{},{},{},{},{},{}",
        entry.id,
        entry.session_id,
        entry.protocol,
        entry.source_ip,
        entry.dest_ip,
        entry.size_bytes,
        entry.timestamp.to_rfc3339()
    )
}

fn from_csv_line(line: &str, line_no: usize) -> Result<PacketLogEntry, StoreError> {
    let corrupt = |reason: &str| StoreError::Corrupt {
        line: line_no,
        reason: reason.to_string(),
    };

    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() != 7 {
        return Err(corrupt("expected 7 fields"));
    }

    let id = parts[0].parse().map_err(|_| corrupt("invalid id"))?;
    let session_id = parts[1]
        .parse::<i64>()
        .map_err(|_| corrupt("invalid session id"))?;
    let protocol = Protocol::from_label(parts[2])
        .ok_or_else(|| corrupt("invalid protocol"))?;
    let size_bytes = parts[5].parse().map_err(|_| corrupt("invalid size"))?;
    let timestamp = DateTime::parse_from_rfc3339(parts[6])
        .map_err(|_| corrupt("invalid timestamp"))?
        .with_timezone(&Utc);

    Ok(PacketLogEntry {
        id,
        session_id: SessionId(session_id),
        protocol: protocol.label(),
        source_ip: parts[3].to_string(),
        dest_ip: parts[4].to_string(),
        size_bytes,
        timestamp,
    })
}

/// End of the packet log as seen by a writer.
struct Tail {
    /// Id of the last complete row, or 0 for an empty log
    last_id: u64,
    /// Bytes after the last newline, left by an interrupted append
    torn: u64,
}

/// Inspect the end of the log. Only reads the last `TAIL_BYTES`.
fn read_tail(file: &mut File) -> Result<Tail, StoreError> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(Tail {
            last_id: 0,
            torn: 0,
        });
    }

    let start = len.saturating_sub(TAIL_BYTES);
    file.seek(SeekFrom::Start(start))?;
    let mut tail = Vec::new();
    file.read_to_end(&mut tail)?;

    let complete = match tail.iter().rposition(|&b| b == b'\n') {
        Some(pos) => pos + 1,
        None if start == 0 => 0,
        None => {
            return Err(StoreError::Corrupt {
                line: 0,
                reason: "no row boundary near the end of the log".to_string(),
            })
        }
    };
    let torn = (tail.len() - complete) as u64;

    let rows = String::from_utf8_lossy(&tail[..complete]);
    let last_id = match rows.lines().rev().map(str::trim).find(|l| !l.is_empty()) {
        Some(row) => row
            .split(',')
            .next()
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| StoreError::Corrupt {
                line: 0,
                reason: "invalid id in last row".to_string(),
            })?,
        None => 0,
    };

    Ok(Tail { last_id, torn })
}

/// `flock` held for the lifetime of the guard.
struct FileLock {
    #[cfg(unix)]
    fd: std::os::unix::io::RawFd,
}

impl FileLock {
    fn exclusive(file: &File) -> Result<Self, StoreError> {
        Self::acquire(file, true)
    }

    fn shared(file: &File) -> Result<Self, StoreError> {
        Self::acquire(file, false)
    }

    #[cfg(unix)]
    fn acquire(file: &File, exclusive: bool) -> Result<Self, StoreError> {
        let fd = file.as_raw_fd();
        let op = if exclusive { libc::LOCK_EX } else { libc::LOCK_SH };
        let result = unsafe { libc::flock(fd, op) };
        if result != 0 {
            return Err(StoreError::Lock(std::io::Error::last_os_error().to_string()));
        }
        Ok(Self { fd })
    }

    /// No-op lock for non-Unix platforms
    #[cfg(not(unix))]
    fn acquire(_file: &File, _exclusive: bool) -> Result<Self, StoreError> {
        Ok(Self {})
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // The fd outlives the guard: every guard is declared after its file
        #[cfg(unix)]
        unsafe {
            libc::flock(self.fd, libc::LOCK_UN);
        }
    }
}
