use std::io::{self, IsTerminal, Write};

use clap::ValueEnum;
use namedipc_sync::CancelToken;
use tracing::debug;

use crate::exit::{io_error, CliResult};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Progress lines on stdout.
///
/// On a terminal, counters are redrawn in place with `\r`; otherwise every
/// update is its own line. A closed stdout (`BrokenPipe`) cancels the run
/// instead of failing it, so the process still tears down and exits 0.
pub struct Progress<W: Write> {
    out: W,
    cancel: CancelToken,
    redraw: bool,
    pending_redraw: bool,
}

impl Progress<io::Stdout> {
    pub fn stdout(cancel: CancelToken) -> Self {
        let redraw = io::stdout().is_terminal();
        Self::new(io::stdout(), cancel, redraw)
    }
}

impl<W: Write> Progress<W> {
    pub fn new(out: W, cancel: CancelToken, redraw: bool) -> Self {
        Self {
            out,
            cancel,
            redraw,
            pending_redraw: false,
        }
    }

    /// A counter that replaces the previous one on a terminal.
    pub fn update(&mut self, text: &str) -> CliResult<()> {
        if self.redraw {
            self.pending_redraw = true;
            self.emit(&format!("{text}\r"))
        } else {
            self.emit(&format!("{text}\n"))
        }
    }

    /// A line that stays on screen.
    pub fn line(&mut self, text: &str) -> CliResult<()> {
        let text = self.after_redraw(text);
        self.emit(&format!("{text}\n"))
    }

    /// Text without a line break, for bars drawn tick by tick.
    pub fn partial(&mut self, text: &str) -> CliResult<()> {
        let text = self.after_redraw(text);
        self.emit(&text)
    }

    /// Move off a redrawn counter so later output starts on a fresh line.
    pub fn finish(&mut self) -> CliResult<()> {
        if self.pending_redraw {
            self.pending_redraw = false;
            return self.emit("\n");
        }
        Ok(())
    }

    fn after_redraw(&mut self, text: &str) -> String {
        if self.pending_redraw {
            self.pending_redraw = false;
            format!("\n{text}")
        } else {
            text.to_string()
        }
    }

    fn emit(&mut self, text: &str) -> CliResult<()> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        let result = self
            .out
            .write_all(text.as_bytes())
            .and_then(|()| self.out.flush());
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                debug!("stdout closed, stopping");
                self.cancel.cancel();
                Ok(())
            }
            Err(err) => Err(io_error("write progress", err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn broken_pipe_cancels_instead_of_failing() {
        let token = CancelToken::new();
        let mut progress = Progress::new(ClosedPipe, token.clone(), false);
        progress.update("Produced 1").unwrap();
        assert!(token.is_cancelled());
        progress.line("still fine").unwrap();
    }

    #[test]
    fn plain_output_uses_one_line_per_update() {
        let mut buf = Vec::new();
        let mut progress = Progress::new(&mut buf, CancelToken::new(), false);
        progress.update("Produced 1").unwrap();
        progress.update("Produced 2").unwrap();
        progress.finish().unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "Produced 1\nProduced 2\n");
    }

    #[test]
    fn terminal_output_redraws_in_place() {
        let mut buf = Vec::new();
        let mut progress = Progress::new(&mut buf, CancelToken::new(), true);
        progress.update("New value of global counter 1").unwrap();
        progress.update("New value of global counter 2").unwrap();
        progress.line("Difference=3").unwrap();
        progress.finish().unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "New value of global counter 1\rNew value of global counter 2\r\nDifference=3\n"
        );
    }
}
