use std::io::Write;

use super::assembler::FrameRecord;
use super::error::SinkError;

/// Consumer of assembled frames. Frames must arrive in strictly increasing order with no gaps.
pub trait FrameSink {
    fn accept(&mut self, record: FrameRecord) -> Result<(), SinkError>;
}

/// Enforces the frame ordering contract for a sink
#[derive(Debug, Clone, Default)]
struct FrameOrder {
    next_frame: u64,
}

impl FrameOrder {
    fn check(&mut self, frame: u64) -> Result<(), SinkError> {
        if frame != self.next_frame {
            return Err(SinkError::OutOfOrder {
                expected: self.next_frame,
                found: frame,
            });
        }
        self.next_frame += 1;
        Ok(())
    }
}

/// Keeps every record in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub records: Vec<FrameRecord>,
    order: FrameOrder,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameSink for MemorySink {
    fn accept(&mut self, record: FrameRecord) -> Result<(), SinkError> {
        self.order.check(record.frame)?;
        self.records.push(record);
        Ok(())
    }
}

/// Writes the plottable columns of each frame as tab separated text, with a header taken from
/// the first frame
#[derive(Debug)]
pub struct AsciiSink<W: Write> {
    writer: W,
    order: FrameOrder,
    header_written: bool,
}

impl<W: Write> AsciiSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            order: FrameOrder::default(),
            header_written: false,
        }
    }

    pub fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> FrameSink for AsciiSink<W> {
    fn accept(&mut self, record: FrameRecord) -> Result<(), SinkError> {
        self.order.check(record.frame)?;
        let values = record.plottable_values();
        if !self.header_written {
            let names: Vec<&str> = values.iter().map(|(name, _)| name.as_str()).collect();
            writeln!(self.writer, "frame\t{}", names.join("\t"))?;
            self.header_written = true;
        }
        let columns: Vec<String> = values.iter().map(|(_, value)| format!("{value}")).collect();
        writeln!(self.writer, "{}\t{}", record.frame, columns.join("\t"))?;
        Ok(())
    }
}
