//! Terminal output for a streamed reply.

use std::io::Write;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::chat_stream::{StreamError, StreamHandler};

/// Shown for validation and fatal errors.
pub const REQUEST_FAILED: &str = "Something went wrong with the request";

/// Cancels the stream behind `token` on Ctrl+C. Abort the returned task once
/// the stream has ended so the next prompt gets the signal instead.
pub fn cancel_on_interrupt(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    })
}

/// Prints fragments as they arrive.
///
/// A reconnect restarts the reply from the first fragment. Text already on
/// screen is not printed again; output resumes once the new reply passes it.
pub struct StreamPrinter<W: Write, E: Write> {
    out: W,
    err: E,
    shown: String,
    current: String,
    restarted: bool,
}

impl StreamPrinter<std::io::Stdout, std::io::Stderr> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdout(), std::io::stderr())
    }
}

impl<W: Write, E: Write> StreamPrinter<W, E> {
    pub fn new(out: W, err: E) -> Self {
        Self {
            out,
            err,
            shown: String::new(),
            current: String::new(),
            restarted: false,
        }
    }

    pub fn into_parts(self) -> (W, E) {
        (self.out, self.err)
    }

    /// Ends a reply cut short by the user.
    pub fn interrupted(&mut self) {
        self.end_line();
        let _ = writeln!(self.err, "[cancelled]");
    }

    fn end_line(&mut self) {
        if !self.shown.is_empty() {
            let _ = writeln!(self.out);
        }
        let _ = self.out.flush();
        self.shown.clear();
        self.current.clear();
        self.restarted = false;
    }

    fn print(&mut self, text: &str) {
        let _ = write!(self.out, "{text}");
        let _ = self.out.flush();
        self.shown.push_str(text);
    }
}

impl<W: Write, E: Write> StreamHandler for StreamPrinter<W, E> {
    fn on_open(&mut self) {
        self.current.clear();
        self.restarted = !self.shown.is_empty();
    }

    fn on_data(&mut self, fragment: &str) {
        self.current.push_str(fragment);
        if !self.restarted {
            self.print(fragment);
            return;
        }

        if self.shown.starts_with(self.current.as_str()) {
            return;
        }
        self.restarted = false;
        if let Some(rest) = self.current.strip_prefix(self.shown.as_str()) {
            let rest = rest.to_string();
            self.print(&rest);
        } else {
            tracing::debug!("restarted reply diverged from printed text");
            let _ = writeln!(self.out);
            self.shown.clear();
            let current = self.current.clone();
            self.print(&current);
        }
    }

    fn on_close(&mut self, _text: &str) {
        let _ = writeln!(self.out);
        self.shown.clear();
        self.end_line();
    }

    fn on_error(&mut self, error: &StreamError) {
        if error.is_fatal() {
            self.end_line();
            let _ = writeln!(self.err, "{REQUEST_FAILED}");
        }
        tracing::debug!("stream error: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chat_stream::{classify_response, StreamErrorCause};

    fn printer() -> StreamPrinter<Vec<u8>, Vec<u8>> {
        StreamPrinter::new(Vec::new(), Vec::new())
    }

    fn text(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).expect("utf8")
    }

    #[test]
    fn prints_fragments_inline() {
        let mut printer = printer();
        printer.on_open();
        printer.on_data("Hi");
        printer.on_data(" there");
        printer.on_close("Hi there");
        let (out, err) = printer.into_parts();
        assert_eq!(text(out), "Hi there\n");
        assert!(err.is_empty());
    }

    fn transport() -> StreamError {
        StreamError::retriable(StreamErrorCause::Transport("reset".to_string()))
    }

    #[test]
    fn reconnect_resumes_without_repeating_text() {
        let mut printer = printer();
        printer.on_open();
        printer.on_data("Hel");
        printer.on_error(&transport());
        printer.on_open();
        printer.on_data("He");
        printer.on_data("llo");
        printer.on_data(" there");
        printer.on_close("Hello there");
        let (out, err) = printer.into_parts();
        assert_eq!(text(out), "Hello there\n");
        assert!(err.is_empty());
    }

    #[test]
    fn diverging_restart_starts_a_new_line() {
        let mut printer = printer();
        printer.on_open();
        printer.on_data("Hi");
        printer.on_error(&transport());
        printer.on_open();
        printer.on_data("Hello");
        printer.on_close("Hello");
        let (out, err) = printer.into_parts();
        assert_eq!(text(out), "Hi\nHello\n");
        assert!(err.is_empty());
    }

    #[test]
    fn fatal_errors_use_generic_message() {
        let mut printer = printer();
        let error = classify_response(400, None).expect_err("fatal");
        printer.on_error(&error);
        let (_, err) = printer.into_parts();
        assert_eq!(text(err), "Something went wrong with the request\n");
    }
}
