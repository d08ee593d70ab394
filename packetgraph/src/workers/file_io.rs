//! Pcap file reader and writer workers (§4.7).

use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::PathBuf;

use crate::config::BURST_SIZE;
use crate::driver::MbufHandle;
use crate::pcap::{self, GlobalHeader};
use crate::ring::Rings;
use crate::workers::{WorkerBody, WorkerHandle};

/// Writes a pcap global header once, then one record per dequeued mbuf. Each written mbuf is
/// handed straight to the stop ring — the writer is always the end of the line for a packet.
pub struct FileWriterWorker {
    writer: BufWriter<File>,
    input: Rings,
    scratch: Vec<MbufHandle>,
    sequence: u32,
}

impl FileWriterWorker {
    pub fn create(path: impl Into<PathBuf>, input: Rings) -> std::io::Result<Self> {
        let file = File::create(path.into())?;
        let mut writer = BufWriter::new(file);
        GlobalHeader::ethernet(65535).write_to(&mut writer)?;
        Ok(FileWriterWorker { writer, input, scratch: Vec::with_capacity(BURST_SIZE), sequence: 0 })
    }
}

impl WorkerBody for FileWriterWorker {
    fn name(&self) -> &str {
        "file-writer"
    }

    fn tick(&mut self, handle: &WorkerHandle) {
        for lane in 0..self.input.lane_count() {
            self.scratch.clear();
            let moved = self.input.lane(lane).dequeue_burst(BURST_SIZE, &mut self.scratch);
            if moved == 0 {
                continue;
            }
            for &mbuf in &self.scratch {
                let bytes = handle.pool.bytes_of(mbuf);
                if let Err(err) = pcap::write_record(&mut self.writer, self.sequence, 0, &bytes) {
                    log::error!("pcap file writer: fatal I/O error: {err}");
                    std::process::exit(1);
                }
                self.sequence += 1;
            }
            handle.stop_ring.enqueue_burst(&self.scratch);
        }
        if let Err(err) = self.writer.flush() {
            log::error!("pcap file writer: fatal flush error: {err}");
            std::process::exit(1);
        }
    }
}

/// Reads a pcap file's global header once, then emits one packet per tick-slot. On EOF, rewinds
/// and increments the repeat counter until `repeat` rewinds have happened, then stops producing
/// (the worker keeps ticking but emits nothing further, per the cooperative-stop model of §4.8 —
/// an explicit terminate still comes from the scheduler).
pub struct FileReaderWorker {
    reader: BufReader<File>,
    data_start: u64,
    repeat_limit: u32,
    repeats_done: u32,
    output: Rings,
    exhausted: bool,
}

impl FileReaderWorker {
    pub fn open(path: impl Into<PathBuf>, repeat: u32, output: Rings) -> std::io::Result<Self> {
        let file = File::open(path.into())?;
        let mut reader = BufReader::new(file);
        GlobalHeader::read_from(&mut reader)?;
        let data_start = reader.stream_position()?;
        Ok(FileReaderWorker { reader, data_start, repeat_limit: repeat, repeats_done: 0, output, exhausted: false })
    }
}

impl WorkerBody for FileReaderWorker {
    fn name(&self) -> &str {
        "file-reader"
    }

    fn tick(&mut self, handle: &WorkerHandle) {
        if self.exhausted {
            return;
        }
        let mut batch = Vec::with_capacity(BURST_SIZE);
        while batch.len() < BURST_SIZE {
            match pcap::read_record(&mut self.reader) {
                Ok(Some((_header, payload))) => {
                    batch.push(handle.pool.construct(&payload));
                }
                Ok(None) => {
                    self.repeats_done += 1;
                    if self.repeats_done >= self.repeat_limit {
                        self.exhausted = true;
                        break;
                    }
                    if let Err(err) = self.reader.seek(SeekFrom::Start(self.data_start)) {
                        log::error!("pcap file reader: fatal seek error: {err}");
                        std::process::exit(1);
                    }
                }
                Err(err) => {
                    log::error!("pcap file reader: fatal I/O error: {err}");
                    std::process::exit(1);
                }
            }
        }
        if !batch.is_empty() {
            crate::ring::safe_enqueue(self.output.lane(0), &batch, &handle.stop_ring, handle.driver.as_ref());
        }
    }
}
