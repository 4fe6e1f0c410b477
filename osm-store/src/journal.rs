//! Append-only, checksummed journal of transactions.
//!
//! Layout: an 8-byte generation id header, then a sequence of records of
//! `len(4 LE) ‖ checksum(32, blake3) ‖ payload(len bytes)`. `append` is the
//! only way to grow the file; a transaction's payload is only considered
//! durable once the whole record (length, checksum, and payload) has been
//! written, so a crash mid-write leaves a truncated, checksum-rejected tail
//! that `read_all` discards rather than surfaces. This mirrors the
//! checksum-then-truncate recovery strategy of the teacher workspace's own
//! journal, collapsed to whole-transaction granularity so a multi-object
//! mutation is one record.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

const HEADER_LEN: u64 = 8;

pub struct Journal {
    file: File,
}

impl Journal {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        file.try_lock_exclusive().map_err(|_| {
            io::Error::new(
                io::ErrorKind::WouldBlock,
                "store is already open in another process",
            )
        })?;

        let len = file.metadata()?.len();
        if len < HEADER_LEN {
            file.set_len(0)?;
            file.write_all(&0u64.to_le_bytes())?;
            file.flush()?;
        }

        Ok(Journal { file })
    }

    /// Appends one transaction payload durably. Returns once the record is
    /// fully on disk (the OS buffer is flushed via `sync_data`).
    pub fn append(&mut self, payload: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::End(0))?;
        let checksum = blake3::hash(payload);
        self.file.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.file.write_all(checksum.as_bytes())?;
        self.file.write_all(payload)?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Replays every well-formed transaction in order. Stops (and, if
    /// `truncate_on_corruption` is set, truncates the file) at the first
    /// record that is incomplete or fails its checksum — never returns a
    /// partially-applied record, satisfying the "no partial reads" contract.
    pub fn read_all(&mut self) -> io::Result<Vec<Vec<u8>>> {
        self.file.seek(SeekFrom::Start(HEADER_LEN))?;
        let mut records = Vec::new();

        loop {
            let record_start = self.file.stream_position()?;
            let mut len_buf = [0u8; 4];
            if self.file.read_exact(&mut len_buf).is_err() {
                break;
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut checksum_buf = [0u8; 32];
            if self.file.read_exact(&mut checksum_buf).is_err() {
                self.truncate_at(record_start)?;
                break;
            }

            let mut payload = vec![0u8; len];
            if self.file.read_exact(&mut payload).is_err() {
                self.truncate_at(record_start)?;
                break;
            }

            if blake3::hash(&payload).as_bytes() != &checksum_buf {
                tracing::warn!(offset = record_start, "journal record failed checksum, truncating");
                self.truncate_at(record_start)?;
                break;
            }

            records.push(payload);
        }

        Ok(records)
    }

    fn truncate_at(&mut self, offset: u64) -> io::Result<()> {
        self.file.set_len(offset)?;
        Ok(())
    }

    /// Rewrites the journal from scratch with exactly `records`, as a single
    /// rename-after-write operation, used by `Store::compact`.
    pub fn rewrite(path: &Path, records: &[Vec<u8>]) -> io::Result<()> {
        let tmp_path = path.with_extension("tmp");
        {
            let mut tmp = Journal::open(&tmp_path)?;
            for record in records {
                tmp.append(record)?;
            }
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}
