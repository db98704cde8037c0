//! Plain-text transcript of a `chat` session.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::core::message::{Speaker, Turn};

const USER_LABEL: &str = "You";

pub struct LoggingState {
    file_path: Option<String>,
}

impl LoggingState {
    /// Opens (or creates) the transcript file. `None` disables logging.
    pub fn new(log_file: Option<String>) -> Result<Self, Box<dyn std::error::Error>> {
        if let Some(path) = &log_file {
            test_file_access(path)?;
        }
        Ok(LoggingState {
            file_path: log_file,
        })
    }

    pub fn is_active(&self) -> bool {
        self.file_path.is_some()
    }

    pub fn status_string(&self) -> String {
        match &self.file_path {
            None => "disabled".to_string(),
            Some(path) => format!(
                "active ({})",
                Path::new(path)
                    .file_name()
                    .unwrap_or_default()
                    .to_string_lossy()
            ),
        }
    }

    pub fn log_turn(&self, turn: &Turn) -> Result<(), Box<dyn std::error::Error>> {
        let Some(path) = &self.file_path else {
            return Ok(());
        };
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        self.write_turn(&mut writer, turn)?;
        writer.flush()?;
        Ok(())
    }

    /// Marks the start of a session so appended transcripts stay readable.
    pub fn start_session(&self) -> Result<(), Box<dyn std::error::Error>> {
        let started = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        self.log_note(&format!("Session started {started}"))
    }

    /// Notes that are not part of the conversation, e.g. a cancelled reply.
    pub fn log_note(&self, note: &str) -> Result<(), Box<dyn std::error::Error>> {
        let Some(path) = &self.file_path else {
            return Ok(());
        };
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "## {note}")?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }

    fn write_turn(&self, writer: &mut impl Write, turn: &Turn) -> std::io::Result<()> {
        if turn.text.is_empty() {
            return Ok(());
        }
        let text = match turn.speaker {
            Speaker::Human => format!("{USER_LABEL}: {}", turn.text),
            Speaker::Bot => turn.text.clone(),
        };
        for line in text.lines() {
            writeln!(writer, "{line}")?;
        }
        writeln!(writer)
    }
}

fn test_file_access(path: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.flush()
}
