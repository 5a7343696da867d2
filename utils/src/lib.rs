use std::io::BufWriter;
use std::io::Cursor;
use std::io::Write;

/// Either a captured buffer (tests) or a real stream.
enum Sink {
    Buffer(Cursor<Vec<u8>>),
    Stream(BufWriter<Box<dyn Write>>),
}

impl Sink {
    fn write_str(&mut self, msg: &str) -> std::io::Result<()> {
        match self {
            Sink::Buffer(inner) => inner.write_all(msg.as_bytes()),
            Sink::Stream(inner) => inner.write_all(msg.as_bytes()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Sink::Buffer(_) => Ok(()),
            Sink::Stream(inner) => inner.flush(),
        }
    }

    fn contents(&self) -> Option<String> {
        match self {
            Sink::Buffer(inner) => Some(String::from_utf8_lossy(inner.get_ref()).into_owned()),
            Sink::Stream(_) => None,
        }
    }
}

/// Where results and diagnostics go. Results are written to `out`, errors
/// with their line numbers to `err`.
pub struct DiagnosticEmitter {
    out: Sink,
    err: Sink,
    errors: usize,
}

impl DiagnosticEmitter {
    pub fn new(out: Box<dyn Write>, err: Box<dyn Write>) -> Self {
        Self {
            out: Sink::Stream(BufWriter::new(out)),
            err: Sink::Stream(BufWriter::new(err)),
            errors: 0,
        }
    }

    pub fn log_to_buffer() -> Self {
        Self {
            out: Sink::Buffer(Cursor::new(Vec::new())),
            err: Sink::Buffer(Cursor::new(Vec::new())),
            errors: 0,
        }
    }

    pub fn out(&mut self, msg: &str) {
        self.out
            .write_str(msg)
            .expect("Failed to write to output buffer.");
    }

    pub fn out_ln(&mut self, msg: &str) {
        self.out(msg);
        self.out("\n");
    }

    pub fn err(&mut self, msg: &str) {
        self.err
            .write_str(msg)
            .expect("Failed to write to error buffer.");
    }

    pub fn err_ln(&mut self, msg: &str) {
        self.err(msg);
        self.err("\n");
    }

    /// What was written to the output, if it is captured.
    pub fn out_buffer(&self) -> Option<String> {
        self.out.contents()
    }

    /// What was written to the error stream, if it is captured.
    pub fn err_buffer(&self) -> Option<String> {
        self.err.contents()
    }

    pub fn error(&mut self, line: u32, message: &str) {
        self.report(line, "", message);
    }

    /// Reports an error at `item` (e.g., `at 'foo'`) on the given line.
    pub fn report(&mut self, line: u32, item: &str, message: &str) {
        self.errors += 1;
        let _ = self
            .err
            .write_str(&format!("[line {line}] Error {item}: {message}\n"));
    }

    /// Number of errors reported through [`DiagnosticEmitter::report`].
    pub fn error_count(&self) -> usize {
        self.errors
    }

    pub fn flush(&mut self) {
        self.out.flush().expect("Failed to flush output buffer.");
        self.err.flush().expect("Failed to flush error buffer.");
    }
}

impl Drop for DiagnosticEmitter {
    fn drop(&mut self) {
        self.flush();
    }
}
