//! Flat-file record store
//!
//! One comma-separated file per stream, header line first, one record per
//! line. The tail record and the record count are kept in memory so
//! "most recent record" never rescans the file.

use super::{CsvRow, FlowRecord, PortRecord, RecordStore, Stored};
use crate::{FlowclassError, Result};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Flow stream file name
pub const FLOW_STATS_FILE: &str = "FlowStats.txt";
/// Port stream file name
pub const PORT_STATS_FILE: &str = "PortStats.txt";

struct Stream<T> {
    path: PathBuf,
    file: File,
    count: u64,
    last: Option<Stored<T>>,
}

fn storage_err(path: &Path, e: impl std::fmt::Display) -> FlowclassError {
    FlowclassError::Storage(format!("{}: {}", path.display(), e))
}

impl<T: CsvRow + Clone> Stream<T> {
    fn open(path: PathBuf) -> Result<Self> {
        let mut count = 0;
        let mut last = None;
        let mut empty = true;
        let mut terminated = true;

        if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| storage_err(&path, e))?;
            empty = content.is_empty();
            terminated = content.ends_with('\n');
            for line in content.lines() {
                let line = line.trim_end();
                if line.is_empty() || line == T::HEADER {
                    continue;
                }
                match T::from_row(line) {
                    Ok(record) => {
                        count += 1;
                        last = Some(Stored { seq: count, record });
                    }
                    Err(e) => {
                        tracing::warn!("Skipping malformed row in {}: {}", path.display(), e);
                    }
                }
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| storage_err(&path, e))?;

        if empty {
            writeln!(file, "{}", T::HEADER).map_err(|e| storage_err(&path, e))?;
        } else if !terminated {
            // next row must not fuse with a truncated last line
            writeln!(file).map_err(|e| storage_err(&path, e))?;
        }

        if count > 0 {
            tracing::info!("Recovered {} records from {}", count, path.display());
        }

        Ok(Self { path, file, count, last })
    }

    fn append(&mut self, record: T) -> Result<u64> {
        writeln!(self.file, "{}", record.to_row()).map_err(|e| storage_err(&self.path, e))?;
        self.file.flush().map_err(|e| storage_err(&self.path, e))?;

        self.count += 1;
        self.last = Some(Stored { seq: self.count, record });
        Ok(self.count)
    }
}

/// Record store backed by two flat files in one directory
pub struct FlatFileRecordStore {
    dir: PathBuf,
    flows: Mutex<Stream<FlowRecord>>,
    ports: Mutex<Stream<PortRecord>>,
}

impl FlatFileRecordStore {
    /// Open (or create) the stream files under `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| storage_err(&dir, e))?;

        Ok(Self {
            flows: Mutex::new(Stream::open(dir.join(FLOW_STATS_FILE))?),
            ports: Mutex::new(Stream::open(dir.join(PORT_STATS_FILE))?),
            dir,
        })
    }

    /// Directory holding the stream files
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl RecordStore for FlatFileRecordStore {
    fn append_flow(&self, record: FlowRecord) -> Result<u64> {
        self.flows.lock().append(record)
    }

    fn append_port(&self, record: PortRecord) -> Result<u64> {
        self.ports.lock().append(record)
    }

    fn latest_flow(&self) -> Result<Option<Stored<FlowRecord>>> {
        Ok(self.flows.lock().last.clone())
    }

    fn latest_port(&self) -> Result<Option<Stored<PortRecord>>> {
        Ok(self.ports.lock().last.clone())
    }

    fn flow_count(&self) -> u64 {
        self.flows.lock().count
    }

    fn port_count(&self) -> u64 {
        self.ports.lock().count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(packets: u64) -> FlowRecord {
        FlowRecord {
            switch_id: 1,
            ingress_port: 1,
            destination_address: "aa:bb:cc:dd:ee:ff".into(),
            packet_count: packets,
            byte_count: packets * 140,
            duration_seconds: 10,
            label: "vimeo".into(),
        }
    }

    #[test]
    fn test_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlatFileRecordStore::open(dir.path()).unwrap();

        store.append_flow(flow(350)).unwrap();

        let content = fs::read_to_string(dir.path().join(FLOW_STATS_FILE)).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], FlowRecord::HEADER);
        assert_eq!(lines[1], "1,1,aa:bb:cc:dd:ee:ff,350,49000,10,vimeo");

        let ports = fs::read_to_string(dir.path().join(PORT_STATS_FILE)).unwrap();
        assert_eq!(ports.trim_end(), PortRecord::HEADER);
    }

    #[test]
    fn test_reopen_recovers_tail() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FlatFileRecordStore::open(dir.path()).unwrap();
            store.append_flow(flow(350)).unwrap();
            store.append_flow(flow(400)).unwrap();
        }

        let store = FlatFileRecordStore::open(dir.path()).unwrap();
        assert_eq!(store.flow_count(), 2);

        let latest = store.latest_flow().unwrap().unwrap();
        assert_eq!(latest.seq, 2);
        assert_eq!(latest.record.packet_count, 400);

        assert_eq!(store.append_flow(flow(500)).unwrap(), 3);

        // header written once
        let content = fs::read_to_string(dir.path().join(FLOW_STATS_FILE)).unwrap();
        assert_eq!(content.matches(FlowRecord::HEADER).count(), 1);
    }

    #[test]
    fn test_reopen_skips_malformed_rows() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(PORT_STATS_FILE),
            format!("{}\n1,1,10,1,20,2\ngarbage\n", PortRecord::HEADER),
        )
        .unwrap();

        let store = FlatFileRecordStore::open(dir.path()).unwrap();
        assert_eq!(store.port_count(), 1);
        assert_eq!(store.latest_port().unwrap().unwrap().record.rx_bytes, 10);
    }

    #[test]
    fn test_append_after_unterminated_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PORT_STATS_FILE);
        fs::write(&path, format!("{}\n1,1,10,1,20,2", PortRecord::HEADER)).unwrap();

        {
            let store = FlatFileRecordStore::open(dir.path()).unwrap();
            assert_eq!(store.port_count(), 1);
            store
                .append_port(PortRecord {
                    switch_id: 1,
                    port_no: 2,
                    rx_bytes: 30,
                    rx_packets: 3,
                    tx_bytes: 40,
                    tx_packets: 4,
                })
                .unwrap();
        }

        let store = FlatFileRecordStore::open(dir.path()).unwrap();
        assert_eq!(store.port_count(), 2);
        let latest = store.latest_port().unwrap().unwrap();
        assert_eq!(latest.seq, 2);
        assert_eq!(latest.record.port_no, 2);
        assert_eq!(latest.record.rx_bytes, 30);
    }

    #[test]
    fn test_header_only_written_to_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PORT_STATS_FILE);
        fs::write(&path, "garbage\n").unwrap();

        let store = FlatFileRecordStore::open(dir.path()).unwrap();
        assert_eq!(store.port_count(), 0);
        drop(store);

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "garbage\n");
    }
}
