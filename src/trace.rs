/*!
A minimal fixed-record trace reader (spec.md §6 "Trace input format"),
grounded in `original_source/inc/tracereader.h`'s buffered, fixed-record
`tracereader` shape.

This is deliberately thin (SPEC_FULL.md §10.5): it reads the raw fixed
record this crate's own integration tests synthesize, not any one of
ChampSim's on-disk trace format variants, and it has no opinion on
transport (no gzip/xz, no cloudsuite auto-detection) — those remain a
CLI-level collaborator's responsibility.
*/

use std::io::{self, Read};

/// Register/memory operand slots per instruction record, matching the
/// upstream simulator's `NUM_INSTR_SOURCES` / `NUM_INSTR_DESTINATIONS`.
pub const NUM_INSTR_SOURCES: usize = 4;
pub const NUM_INSTR_DESTINATIONS: usize = 2;

/// One fixed-size instruction record (spec.md §6): instruction pointer,
/// branch kind, source/destination register ids, source/destination memory
/// addresses, and the taken flag. The Cloudsuite variant's extra per-record
/// CPU id is carried as `cpu`, unused by the non-Cloudsuite reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionRecord {
    pub ip: u64,
    pub is_branch: bool,
    pub branch_taken: bool,
    pub destination_registers: [u8; NUM_INSTR_DESTINATIONS],
    pub source_registers: [u8; NUM_INSTR_SOURCES],
    pub destination_memory: [u64; NUM_INSTR_DESTINATIONS],
    pub source_memory: [u64; NUM_INSTR_SOURCES],
    pub cpu: u8,
}

const RECORD_BYTES: usize = 8 // ip
    + 1 // is_branch
    + 1 // branch_taken
    + NUM_INSTR_DESTINATIONS // destination_registers
    + NUM_INSTR_SOURCES // source_registers
    + NUM_INSTR_DESTINATIONS * 8 // destination_memory
    + NUM_INSTR_SOURCES * 8 // source_memory
    + 1; // cpu

impl InstructionRecord {
    fn decode(buf: &[u8; RECORD_BYTES]) -> Self {
        let mut cursor = 0usize;
        let mut take = |n: usize| {
            let slice = &buf[cursor..cursor + n];
            cursor += n;
            slice
        };

        let ip = u64::from_le_bytes(take(8).try_into().unwrap());
        let is_branch = take(1)[0] != 0;
        let branch_taken = take(1)[0] != 0;

        let mut destination_registers = [0u8; NUM_INSTR_DESTINATIONS];
        destination_registers.copy_from_slice(take(NUM_INSTR_DESTINATIONS));

        let mut source_registers = [0u8; NUM_INSTR_SOURCES];
        source_registers.copy_from_slice(take(NUM_INSTR_SOURCES));

        let mut destination_memory = [0u64; NUM_INSTR_DESTINATIONS];
        for slot in destination_memory.iter_mut() {
            *slot = u64::from_le_bytes(take(8).try_into().unwrap());
        }

        let mut source_memory = [0u64; NUM_INSTR_SOURCES];
        for slot in source_memory.iter_mut() {
            *slot = u64::from_le_bytes(take(8).try_into().unwrap());
        }

        let cpu = take(1)[0];

        Self { ip, is_branch, branch_taken, destination_registers, source_registers, destination_memory, source_memory, cpu }
    }

    fn encode(&self, buf: &mut [u8; RECORD_BYTES]) {
        let mut cursor = 0usize;
        buf[cursor..cursor + 8].copy_from_slice(&self.ip.to_le_bytes());
        cursor += 8;
        buf[cursor] = self.is_branch as u8;
        cursor += 1;
        buf[cursor] = self.branch_taken as u8;
        cursor += 1;
        buf[cursor..cursor + NUM_INSTR_DESTINATIONS].copy_from_slice(&self.destination_registers);
        cursor += NUM_INSTR_DESTINATIONS;
        buf[cursor..cursor + NUM_INSTR_SOURCES].copy_from_slice(&self.source_registers);
        cursor += NUM_INSTR_SOURCES;
        for &addr in &self.destination_memory {
            buf[cursor..cursor + 8].copy_from_slice(&addr.to_le_bytes());
            cursor += 8;
        }
        for &addr in &self.source_memory {
            buf[cursor..cursor + 8].copy_from_slice(&addr.to_le_bytes());
            cursor += 8;
        }
        buf[cursor] = self.cpu;
    }
}

/// Either an instruction record or end-of-trace (spec.md §7: "Trace EOF ->
/// graceful simulator shutdown").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    Instruction(InstructionRecord),
    Eof,
}

/// Reads fixed-size [`InstructionRecord`]s off any `Read`, buffering like
/// `tracereader`'s `refresh_buffer` but without its deque lookahead —
/// one record is decoded per `next()` call.
pub struct RecordReader<R> {
    inner: R,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read the next record, or `TraceEvent::Eof` at a clean end-of-stream.
    pub fn next(&mut self) -> io::Result<TraceEvent> {
        let mut buf = [0u8; RECORD_BYTES];
        let mut read = 0;
        while read < RECORD_BYTES {
            match self.inner.read(&mut buf[read..])? {
                0 if read == 0 => return Ok(TraceEvent::Eof),
                0 => return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated instruction record")),
                n => read += n,
            }
        }
        Ok(TraceEvent::Instruction(InstructionRecord::decode(&buf)))
    }
}

/// Serialize a record in the same fixed layout [`RecordReader`] consumes;
/// used by integration tests to synthesize traces in-memory.
pub fn encode_record(record: &InstructionRecord) -> Vec<u8> {
    let mut buf = [0u8; RECORD_BYTES];
    record.encode(&mut buf);
    buf.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> InstructionRecord {
        InstructionRecord {
            ip: 0x0040_1000,
            is_branch: true,
            branch_taken: true,
            destination_registers: [1, 0],
            source_registers: [2, 3, 0, 0],
            destination_memory: [0, 0],
            source_memory: [0xdead_be00, 0],
            cpu: 0,
        }
    }

    #[test]
    fn round_trips_a_single_record() {
        let record = sample();
        let bytes = encode_record(&record);
        let mut reader = RecordReader::new(Cursor::new(bytes));
        assert_eq!(reader.next().unwrap(), TraceEvent::Instruction(record));
        assert_eq!(reader.next().unwrap(), TraceEvent::Eof);
    }

    #[test]
    fn reads_a_sequence_in_order_then_eof() {
        let records = [sample(), InstructionRecord { ip: 0x0040_1004, ..sample() }];
        let mut bytes = Vec::new();
        for r in &records {
            bytes.extend(encode_record(r));
        }
        let mut reader = RecordReader::new(Cursor::new(bytes));
        for expected in &records {
            assert_eq!(reader.next().unwrap(), TraceEvent::Instruction(*expected));
        }
        assert_eq!(reader.next().unwrap(), TraceEvent::Eof);
    }

    #[test]
    fn truncated_trailing_record_is_an_error() {
        let mut bytes = encode_record(&sample());
        bytes.truncate(bytes.len() - 1);
        let mut reader = RecordReader::new(Cursor::new(bytes));
        assert!(reader.next().is_err());
    }
}
