//! C8: the append-only key journal (§4.6, §6.2). Source of truth for the
//! optimizer's live key set; never consulted on the `get`/`contains` path.
//!
//! Record format, one line per entry: `I:<len>:<key_bytes>\n` (insert) or
//! `R:<len>:<key_bytes>\n` (remove). `<len>` is the decimal byte length of
//! the key, so keys may contain `:` or even newlines — the parser reads
//! exactly `len` bytes after the second colon rather than splitting on
//! delimiters.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalOp {
    Insert,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub op: JournalOp,
    pub key: Vec<u8>,
}

/// Parse a journal file's bytes into its ordered sequence of entries.
/// Tolerant of a truncated final record (a crash mid-append): an
/// incomplete trailing line is simply dropped rather than erroring, since
/// the journal is explicitly best-effort (§7 "Journal/file divergence").
pub fn parse_entries(bytes: &[u8]) -> Vec<JournalEntry> {
    let mut entries = Vec::new();
    let mut reader = bytes;
    loop {
        let Some(colon1) = find_byte(reader, b':') else { break };
        if colon1 == 0 {
            break;
        }
        let op = match reader[0] {
            b'I' => JournalOp::Insert,
            b'R' => JournalOp::Remove,
            _ => break,
        };
        let rest = &reader[colon1 + 1..];
        let Some(colon2) = find_byte(rest, b':') else { break };
        let Ok(len_str) = std::str::from_utf8(&rest[..colon2]) else { break };
        let Ok(len) = len_str.parse::<usize>() else { break };
        let body = &rest[colon2 + 1..];
        if body.len() < len + 1 {
            break; // truncated record, discard
        }
        if body[len] != b'\n' {
            break;
        }
        entries.push(JournalEntry { op, key: body[..len].to_vec() });
        reader = &body[len + 1..];
    }
    entries
}

fn find_byte(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().position(|&b| b == needle)
}

/// Apply a sequence of entries in order, producing the live key set per
/// §4.6: INSERT de-duplicates (last write wins for ordering purposes; a
/// key already live stays live), REMOVE cancels a prior INSERT.
pub fn apply_entries(entries: &[JournalEntry]) -> Vec<Vec<u8>> {
    let mut live: HashMap<Vec<u8>, usize> = HashMap::new();
    let mut order: Vec<Vec<u8>> = Vec::new();
    for entry in entries {
        match entry.op {
            JournalOp::Insert => {
                if !live.contains_key(&entry.key) {
                    live.insert(entry.key.clone(), order.len());
                    order.push(entry.key.clone());
                }
            }
            JournalOp::Remove => {
                live.remove(&entry.key);
            }
        }
    }
    order.into_iter().filter(|k| live.contains_key(k)).collect()
}

fn encode(op: JournalOp, key: &[u8]) -> Vec<u8> {
    let tag: u8 = match op {
        JournalOp::Insert => b'I',
        JournalOp::Remove => b'R',
    };
    let mut line = Vec::with_capacity(key.len() + 16);
    line.push(tag);
    line.push(b':');
    line.extend_from_slice(key.len().to_string().as_bytes());
    line.push(b':');
    line.extend_from_slice(key);
    line.push(b'\n');
    line
}

/// Append-only on-disk journal. Appends happen under a short mutex, same
/// shape as the teacher's `DiskWAL` append path (`wal/disk.rs`), without
/// the group-commit background thread — journal writes are not on the hot
/// path and don't need batching.
pub struct KeyJournal {
    path: PathBuf,
    file: Mutex<File>,
    entry_count: std::sync::atomic::AtomicU64,
}

impl KeyJournal {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(Error::Journal)?;
        let count = {
            let mut reader = BufReader::new(File::open(path).map_err(Error::Journal)?);
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).map_err(Error::Journal)?;
            parse_entries(&buf).len() as u64
        };
        Ok(Self { path: path.to_path_buf(), file: Mutex::new(file), entry_count: std::sync::atomic::AtomicU64::new(count) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_insert(&self, key: &[u8]) -> Result<()> {
        self.append(JournalOp::Insert, key)
    }

    pub fn record_remove(&self, key: &[u8]) -> Result<()> {
        self.append(JournalOp::Remove, key)
    }

    fn append(&self, op: JournalOp, key: &[u8]) -> Result<()> {
        let line = encode(op, key);
        let mut file = self.file.lock();
        file.write_all(&line).map_err(Error::Journal)?;
        self.entry_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    /// Durably persist appended records.
    pub fn flush(&self) -> Result<()> {
        self.file.lock().sync_all().map_err(Error::Journal)
    }

    /// Number of entries appended since open (informational — §3 header
    /// `journal_entry_count`), not the live key count.
    pub fn len(&self) -> u64 {
        self.entry_count.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reconstruct the live key set by replaying every entry in order
    /// (§4.6, P7).
    pub fn live_keys(&self) -> Result<Vec<Vec<u8>>> {
        // Hold the append lock while reading so a concurrent append can't
        // interleave a half-written record into our snapshot.
        let file = self.file.lock();
        let mut reader = File::open(&self.path).map_err(Error::Journal)?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).map_err(Error::Journal)?;
        drop(file);
        let entries = parse_entries(&buf);
        Ok(apply_entries(&entries))
    }

    /// Rewrite the journal to contain only the current live-key
    /// projection (§4.6): write to a temp file, `sync_all`, then rename
    /// over the original. A crash mid-rewrite leaves either the old or
    /// the new file intact, never a half-written one (the OS rename is
    /// atomic on the same filesystem).
    pub fn compact(&self) -> Result<()> {
        let mut file = self.file.lock();
        let live = {
            let mut reader = File::open(&self.path).map_err(Error::Journal)?;
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).map_err(Error::Journal)?;
            apply_entries(&parse_entries(&buf))
        };

        let tmp_path = self.path.with_extension("journal.tmp");
        {
            let mut tmp = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .map_err(Error::Journal)?;
            for key in &live {
                tmp.write_all(&encode(JournalOp::Insert, key)).map_err(Error::Journal)?;
            }
            tmp.sync_all().map_err(Error::Journal)?;
        }
        std::fs::rename(&tmp_path, &self.path).map_err(Error::Journal)?;

        // Reopen the append handle onto the now-compacted file.
        *file = OpenOptions::new().create(true).read(true).append(true).open(&self.path).map_err(Error::Journal)?;
        self.entry_count.store(live.len() as u64, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }
}
