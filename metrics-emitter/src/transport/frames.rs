use std::{ops::Deref, vec::Drain};

/// Smallest line that can be rendered, including its newline.
pub(crate) const SMALLEST_VALID_LINE: &[u8] = b"a:0\n";

/// Outcome of writing a batch of lines into a [`FrameWriter`].
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct WriteResult {
    lines_written: u64,
    lines_dropped: u64,
    bytes_dropped: u64,
}

impl WriteResult {
    pub const fn lines_written(&self) -> u64 {
        self.lines_written
    }

    pub const fn lines_dropped(&self) -> u64 {
        self.lines_dropped
    }

    pub const fn bytes_dropped(&self) -> u64 {
        self.bytes_dropped
    }
}

/// Packs newline-terminated lines into datagram-sized frames.
///
/// Every line is written whole, with its trailing newline, into the current frame. When appending a line would push the
/// current frame past the maximum frame length, the current frame is closed and the line starts a new one. A line that
/// cannot fit into an empty frame by itself is dropped, so no frame ever exceeds the maximum length and no line is ever
/// split across frames.
///
/// Frames are yielded in the order they were written, and lines within them keep their insertion order.
pub(crate) struct FrameWriter {
    max_frame_len: usize,
    frames_buf: Vec<u8>,
    offsets: Vec<usize>,
}

impl FrameWriter {
    /// Creates a new `FrameWriter` with the given maximum frame length.
    pub fn new(max_frame_len: usize) -> Self {
        // NOTE: The builder rejects smaller limits, this only double checks that we got a sanitized value.
        assert!(
            max_frame_len >= SMALLEST_VALID_LINE.len(),
            "maximum frame length is too small to allow any line to be written (must be {} or greater)",
            SMALLEST_VALID_LINE.len()
        );

        Self { max_frame_len, frames_buf: Vec::new(), offsets: Vec::new() }
    }

    fn last_offset(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }

    /// Returns the number of bytes in the current, unfinished frame.
    fn current_frame_len(&self) -> usize {
        self.frames_buf.len() - self.last_offset()
    }

    /// Closes the current frame, if it holds anything, and starts a new one.
    fn finalize_current_frame(&mut self) {
        if self.current_frame_len() == 0 {
            return;
        }

        self.offsets.push(self.frames_buf.len());
    }

    /// Writes a single line.
    ///
    /// Returns `false` if the line was dropped for being larger than a frame.
    pub fn write_line(&mut self, line: &str) -> bool {
        let line_len = line.len() + 1;
        if line_len > self.max_frame_len {
            return false;
        }

        if self.current_frame_len() + line_len > self.max_frame_len {
            self.finalize_current_frame();
        }

        self.frames_buf.extend_from_slice(line.as_bytes());
        self.frames_buf.push(b'\n');
        true
    }

    /// Writes all of the given lines, in order.
    pub fn write_lines<'a, I>(&mut self, lines: I) -> WriteResult
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut result = WriteResult::default();
        for line in lines {
            if self.write_line(line) {
                result.lines_written += 1;
            } else {
                result.lines_dropped += 1;
                result.bytes_dropped += line.len() as u64 + 1;
            }
        }

        result
    }

    /// Returns a consuming iterator over all frames written so far.
    ///
    /// The writer is empty again once the iterator is dropped, but keeps its allocations.
    pub fn frames(&mut self) -> Frames<'_> {
        self.finalize_current_frame();
        Frames::new(&mut self.frames_buf, &mut self.offsets)
    }
}

/// Iterator over all frames written by a `FrameWriter`.
pub(crate) struct Frames<'a> {
    frames_buf: ConsumingBufferSwap<'a, u8>,
    start: usize,
    offsets: Drain<'a, usize>,
}

impl<'a> Frames<'a> {
    fn new(frames_buf: &'a mut Vec<u8>, offsets: &'a mut Vec<usize>) -> Self {
        Self { frames_buf: ConsumingBufferSwap::new(frames_buf), start: 0, offsets: offsets.drain(..) }
    }

    /// Returns the number of remaining frames.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Returns the next frame, or `None` once all frames were consumed.
    pub fn next_frame(&mut self) -> Option<&[u8]> {
        let offset = self.offsets.next()?;

        let frame = &self.frames_buf[self.start..offset];
        self.start = offset;

        Some(frame)
    }
}

// Swaps the source buffer out for an empty one up front, so the source is left empty even if the drop logic never runs.
// On drop, the original allocation is cleared and handed back for reuse.
struct ConsumingBufferSwap<'a, T> {
    source: &'a mut Vec<T>,
    original: Vec<T>,
}

impl<'a, T> ConsumingBufferSwap<'a, T> {
    fn new(source: &'a mut Vec<T>) -> Self {
        let original = std::mem::take(source);
        Self { source, original }
    }
}

impl<'a, T> Drop for ConsumingBufferSwap<'a, T> {
    fn drop(&mut self) {
        self.original.clear();
        std::mem::swap(self.source, &mut self.original);
    }
}

impl<'a, T> Deref for ConsumingBufferSwap<'a, T> {
    type Target = Vec<T>;

    fn deref(&self) -> &Self::Target {
        &self.original
    }
}
