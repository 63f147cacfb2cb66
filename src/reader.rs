//! Incremental line reading with bounded memory.
//!
//! The reader owns one open handle per file incarnation, seeked to the start
//! offset, and turns byte-level growth into line records. A carry buffer
//! holds the bytes of a line whose terminator has not arrived yet; it is
//! capped at the maximum line size, so memory stays bounded no matter what
//! the writer does.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;

use crate::line::{Line, LineError};

pub(crate) struct LineReader {
    reader: BufReader<File>,
    /// Absolute position after the last byte consumed from the file.
    offset: u64,
    /// Bytes of the line currently being accumulated; never exceeds
    /// `max_line_size`.
    carry: Vec<u8>,
    max_line_size: usize,
}

impl LineReader {
    pub fn open(
        path: &Path,
        start: SeekFrom,
        read_buffer_size: usize,
        max_line_size: usize,
    ) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let offset = file.seek(start)?;

        Ok(Self {
            reader: BufReader::with_capacity(read_buffer_size, file),
            offset,
            carry: Vec::new(),
            max_line_size,
        })
    }

    /// Position after the last consumed byte.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The next record, or `None` at EOF. Partial-line bytes stay in the
    /// carry across calls; a later call picks them up once the file grows.
    ///
    /// Every 0x0A boundary-marks a record. A line reaching `max_line_size`
    /// without a terminator is emitted as a full-sized fragment marked
    /// `TooLong`, and the suffix after its eventual terminator becomes a
    /// final, possibly empty, unmarked record.
    pub fn next_line(&mut self) -> io::Result<Option<Line>> {
        loop {
            if self.carry.len() == self.max_line_size {
                let text = String::from_utf8_lossy(&self.carry).into_owned();
                self.carry.clear();
                return Ok(Some(Line::with_error(text, self.offset, LineError::TooLong)));
            }

            let room = self.max_line_size - self.carry.len();
            let (consumed, complete) = {
                let buf = self.reader.fill_buf()?;
                if buf.is_empty() {
                    return Ok(None);
                }
                match buf.iter().take(room).position(|&b| b == b'\n') {
                    Some(i) => {
                        self.carry.extend_from_slice(&buf[..i]);
                        (i + 1, true)
                    }
                    None => {
                        let take = buf.len().min(room);
                        self.carry.extend_from_slice(&buf[..take]);
                        (take, false)
                    }
                }
            };
            self.reader.consume(consumed);
            self.offset += consumed as u64;

            if complete {
                if self.carry.last() == Some(&b'\r') {
                    self.carry.pop();
                }
                let text = String::from_utf8_lossy(&self.carry).into_owned();
                self.carry.clear();
                return Ok(Some(Line::new(text, self.offset)));
            }
        }
    }

    /// Drain the carry as a final `Partial` record, if it holds anything.
    /// Used when an incarnation closes before the terminator arrived.
    pub fn take_partial(&mut self) -> Option<Line> {
        if self.carry.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry.clear();
        Some(Line::with_error(text, self.offset, LineError::Partial))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn reader_for(content: &[u8], max_line_size: usize) -> (TempDir, LineReader) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("input.log");
        fs::write(&path, content).unwrap();
        let reader = LineReader::open(&path, SeekFrom::Start(0), 4096, max_line_size).unwrap();
        (dir, reader)
    }

    fn drain(reader: &mut LineReader) -> Vec<Line> {
        let mut lines = Vec::new();
        while let Some(line) = reader.next_line().unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn single_line_with_offset_after_terminator() {
        let (_dir, mut reader) = reader_for(b"line1\n", 1024);
        let lines = drain(&mut reader);

        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "line1");
        assert_eq!(lines[0].offset, 6);
        assert!(lines[0].error.is_none());
    }

    #[test]
    fn offsets_ascend_strictly() {
        let (_dir, mut reader) = reader_for(b"a\nbb\nccc\n", 1024);
        let lines = drain(&mut reader);

        let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, ["a", "bb", "ccc"]);
        let offsets: Vec<u64> = lines.iter().map(|l| l.offset).collect();
        assert_eq!(offsets, [2, 5, 9]);
    }

    #[test]
    fn carriage_return_is_stripped_but_counted() {
        let (_dir, mut reader) = reader_for(b"dos\r\nunix\n", 1024);
        let lines = drain(&mut reader);

        assert_eq!(lines[0].text, "dos");
        assert_eq!(lines[0].offset, 5);
        assert_eq!(lines[1].text, "unix");
        assert_eq!(lines[1].offset, 10);
    }

    #[test]
    fn interior_carriage_returns_survive() {
        let (_dir, mut reader) = reader_for(b"a\rb\n", 1024);
        let lines = drain(&mut reader);
        assert_eq!(lines[0].text, "a\rb");
    }

    #[test]
    fn empty_lines_are_records() {
        let (_dir, mut reader) = reader_for(b"a\n\nb\n", 1024);
        let lines = drain(&mut reader);

        let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, ["a", "", "b"]);
    }

    #[test]
    fn partial_line_is_held_back_at_eof() {
        let (_dir, mut reader) = reader_for(b"done\nhalf", 1024);
        let lines = drain(&mut reader);

        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "done");
        assert_eq!(reader.offset(), 9);
    }

    #[test]
    fn partial_line_completes_after_growth() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("growing.log");
        fs::write(&path, b"par").unwrap();

        let mut reader = LineReader::open(&path, SeekFrom::Start(0), 4096, 1024).unwrap();
        assert!(reader.next_line().unwrap().is_none());

        let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"tial\n").unwrap();
        f.flush().unwrap();

        let line = reader.next_line().unwrap().expect("completed line");
        assert_eq!(line.text, "partial");
        assert_eq!(line.offset, 8);
    }

    #[test]
    fn oversize_line_splits_at_the_cap() {
        // 20 bytes of payload against a cap of 8: two full fragments plus a
        // terminated remainder
        let mut content = vec![b'A'; 20];
        content.push(b'\n');
        let (_dir, mut reader) = reader_for(&content, 8);
        let lines = drain(&mut reader);

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].text, "AAAAAAAA");
        assert_eq!(lines[0].error, Some(LineError::TooLong));
        assert_eq!(lines[0].offset, 8);
        assert_eq!(lines[1].text, "AAAAAAAA");
        assert_eq!(lines[1].error, Some(LineError::TooLong));
        assert_eq!(lines[1].offset, 16);
        assert_eq!(lines[2].text, "AAAA");
        assert_eq!(lines[2].error, None);
        assert_eq!(lines[2].offset, 21);

        let total: usize = lines.iter().map(|l| l.text.len()).sum();
        assert_eq!(total, 20);
    }

    #[test]
    fn exact_multiples_of_the_cap_end_with_an_empty_record() {
        // N full fragments followed by the terminator: N marked records and
        // one final empty one
        let n = 3;
        let cap = 8;
        let mut content = vec![b'A'; n * cap];
        content.push(b'\n');
        let (_dir, mut reader) = reader_for(&content, cap);
        let lines = drain(&mut reader);

        assert_eq!(lines.len(), n + 1);
        for fragment in &lines[..n] {
            assert_eq!(fragment.text.len(), cap);
            assert_eq!(fragment.error, Some(LineError::TooLong));
        }
        assert_eq!(lines[n].text, "");
        assert_eq!(lines[n].error, None);
        assert_eq!(lines[n].offset, (n * cap + 1) as u64);
    }

    #[test]
    fn line_of_exactly_the_cap_minus_terminator_is_not_marked() {
        let mut content = vec![b'B'; 7];
        content.push(b'\n');
        let (_dir, mut reader) = reader_for(&content, 8);
        let lines = drain(&mut reader);

        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text.len(), 7);
        assert!(lines[0].error.is_none());
    }

    #[test]
    fn open_at_offset_skips_earlier_bytes() {
        let (_dir, mut reader) = {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("input.log");
            fs::write(&path, b"skip me\nkeep me\n").unwrap();
            let reader = LineReader::open(&path, SeekFrom::Start(8), 4096, 1024).unwrap();
            (dir, reader)
        };

        let lines = drain(&mut reader);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "keep me");
        assert_eq!(lines[0].offset, 16);
    }

    #[test]
    fn open_at_end_reads_nothing() {
        let (_dir, mut reader) = {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("input.log");
            fs::write(&path, b"old news\n").unwrap();
            let reader = LineReader::open(&path, SeekFrom::End(0), 4096, 1024).unwrap();
            (dir, reader)
        };

        assert_eq!(reader.offset(), 9);
        assert!(reader.next_line().unwrap().is_none());
    }

    #[test]
    fn take_partial_drains_the_carry_once() {
        let (_dir, mut reader) = reader_for(b"no terminator", 1024);
        assert!(reader.next_line().unwrap().is_none());

        let partial = reader.take_partial().expect("partial record");
        assert_eq!(partial.text, "no terminator");
        assert_eq!(partial.error, Some(LineError::Partial));
        assert_eq!(partial.offset, 13);

        assert!(reader.take_partial().is_none());
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let (_dir, mut reader) = reader_for(b"ok\n\xff\xfe\n", 1024);
        let lines = drain(&mut reader);

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "ok");
        assert_eq!(lines[1].text, "\u{fffd}\u{fffd}");
        assert_eq!(lines[1].offset, 6);
    }

    #[test]
    fn tiny_read_buffer_still_assembles_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("input.log");
        fs::write(&path, b"a long-ish line that spans buffers\nshort\n").unwrap();

        let mut reader = LineReader::open(&path, SeekFrom::Start(0), 4, 1024).unwrap();
        let lines = drain(&mut reader);

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "a long-ish line that spans buffers");
        assert_eq!(lines[1].text, "short");
    }
}
