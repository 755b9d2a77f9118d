//! Primary (body) and diagnostic output streams.

use std::cell::RefCell;
use std::fmt::Display;
use std::io::{self, Write};
use std::rc::Rc;

use protocol_h2::HeaderField;
use tracing::warn;

/// Destination of everything the client prints.
///
/// The body stream receives response payload bytes and nothing else; status
/// lines and header dumps go to the diagnostic stream. Write failures are
/// logged and otherwise ignored, since bytes already written are never
/// retracted.
pub struct Output {
    body: Box<dyn Write>,
    diag: Box<dyn Write>,
}

impl Output {
    pub fn new(body: impl Write + 'static, diag: impl Write + 'static) -> Self {
        Self {
            body: Box::new(body),
            diag: Box::new(diag),
        }
    }

    /// Body on stdout, diagnostics on stderr.
    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr())
    }

    pub fn body(&mut self, data: &[u8]) {
        if let Err(err) = self.body.write_all(data) {
            warn!(error = %err, "failed to write response body");
        }
    }

    /// One status line on the diagnostic stream.
    pub fn status(&mut self, line: impl Display) {
        if let Err(err) = writeln!(self.diag, "{line}") {
            warn!(error = %err, "failed to write diagnostic");
        }
    }

    /// `title` followed by a header dump on the diagnostic stream.
    pub fn headers(&mut self, title: &str, headers: &[HeaderField]) {
        let result = writeln!(self.diag, "{title}").and_then(|()| write_headers(&mut self.diag, headers));
        if let Err(err) = result {
            warn!(error = %err, "failed to write header dump");
        }
    }

    pub fn flush(&mut self) {
        if let Err(err) = self.body.flush() {
            warn!(error = %err, "failed to flush response body");
        }
        if let Err(err) = self.diag.flush() {
            warn!(error = %err, "failed to flush diagnostics");
        }
    }
}

/// Dump headers as `<name>: <value>` lines followed by a blank line. Names
/// and values are written as raw bytes.
pub fn write_headers(w: &mut impl Write, headers: &[HeaderField]) -> io::Result<()> {
    for header in headers {
        w.write_all(&header.name)?;
        w.write_all(b": ")?;
        w.write_all(&header.value)?;
        w.write_all(b"\n")?;
    }
    w.write_all(b"\n")
}

/// In-memory sink that can be handed to [`Output`] while a clone keeps
/// access to the bytes written.
#[derive(Clone, Default)]
pub struct Capture(Rc<RefCell<Vec<u8>>>);

impl Capture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
