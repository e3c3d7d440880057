//! Structured per-service logs.
//!
//! Every line a service writes becomes one JSON object on its own line, tagged
//! with the stream it came from. The file is append-only while the service runs.
use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tracing::{debug, warn};

/// Output stream a log record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// One line of service output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Originating stream.
    pub stream: LogStream,
    /// Raw line text without the trailing newline.
    pub text: String,
    /// When the line was captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl LogRecord {
    /// Record for a line captured now.
    pub fn new(stream: LogStream, text: impl Into<String>) -> Self {
        Self {
            stream,
            text: text.into(),
            timestamp: Some(Utc::now()),
        }
    }
}

/// Shared handle the stdout and stderr writers append through.
pub type LogSink = Arc<Mutex<File>>;

/// Creates (or truncates) the log file for a fresh launch.
pub fn prepare_log(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    File::create(path)?;
    Ok(())
}

/// Opens the log for appending, creating it if needed.
pub fn open_sink(path: &Path) -> io::Result<LogSink> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Arc::new(Mutex::new(file)))
}

/// Appends one record as a JSON line.
pub fn append_record(sink: &LogSink, record: &LogRecord) -> io::Result<()> {
    let mut line = serde_json::to_string(record).map_err(io::Error::other)?;
    line.push('\n');
    let mut file = sink
        .lock()
        .map_err(|err| io::Error::other(err.to_string()))?;
    file.write_all(line.as_bytes())
}

/// Spawns a thread copying every line of `reader` into the log, tagged `stream`.
pub fn spawn_log_writer<R>(reader: R, stream: LogStream, sink: LogSink) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf);
                    let text = text.trim_end_matches(['\n', '\r']);
                    if let Err(err) = append_record(&sink, &LogRecord::new(stream, text)) {
                        warn!("Failed to write {stream} log record: {err}");
                    }
                }
                Err(err) => {
                    warn!("Failed to read {stream}: {err}");
                    break;
                }
            }
        }
        debug!("{stream} writer finished");
    })
}

/// Number of stdout and stderr records in the log. Unreadable logs count as empty.
pub fn log_counts(path: &Path) -> (usize, usize) {
    let Ok(file) = File::open(path) else {
        return (0, 0);
    };

    let mut stdout = 0;
    let mut stderr = 0;
    for line in BufReader::new(file).lines().map_while(Result::ok) {
        match serde_json::from_str::<LogRecord>(&line) {
            Ok(record) if record.stream == LogStream::Stdout => stdout += 1,
            Ok(_) => stderr += 1,
            Err(_) => continue,
        }
    }
    (stdout, stderr)
}

/// Incremental reader over a log that only ever sees complete new records.
#[derive(Debug)]
pub struct LogFollower {
    path: PathBuf,
    offset: u64,
}

impl LogFollower {
    /// Follows `path` from its beginning.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
        }
    }

    /// Reads records appended since the last call. A partially written trailing
    /// line is left for the next call.
    pub fn read_new(&mut self) -> io::Result<Vec<LogRecord>> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        if file.metadata()?.len() < self.offset {
            self.offset = 0;
        }
        file.seek(SeekFrom::Start(self.offset))?;

        let mut chunk = Vec::new();
        file.read_to_end(&mut chunk)?;
        let complete = match chunk.iter().rposition(|byte| *byte == b'\n') {
            Some(idx) => idx + 1,
            None => return Ok(Vec::new()),
        };
        self.offset += complete as u64;

        let records = String::from_utf8_lossy(&chunk[..complete])
            .lines()
            .filter_map(|line| serde_json::from_str::<LogRecord>(line).ok())
            .collect();
        Ok(records)
    }

    /// Whether any new record's text contains `needle`.
    pub fn find_text(&mut self, needle: &str) -> io::Result<bool> {
        Ok(self
            .read_new()?
            .iter()
            .any(|record| record.text.contains(needle)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    #[test]
    fn records_serialize_with_stream_tag_and_text() {
        let record = LogRecord {
            stream: LogStream::Stderr,
            text: "boom".into(),
            timestamp: None,
        };
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"stream":"stderr","text":"boom"}"#
        );
    }

    #[test]
    fn writer_tags_each_line_and_counts_match() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs/svc.log");
        prepare_log(&path).unwrap();
        let sink = open_sink(&path).unwrap();

        spawn_log_writer(Cursor::new("one\ntwo\r\nthree"), LogStream::Stdout, sink.clone())
            .join()
            .unwrap();
        spawn_log_writer(Cursor::new("oops\n"), LogStream::Stderr, sink)
            .join()
            .unwrap();

        assert_eq!(log_counts(&path), (3, 1));
        let texts: Vec<_> = LogFollower::new(&path)
            .read_new()
            .unwrap()
            .into_iter()
            .map(|record| record.text)
            .collect();
        assert_eq!(texts, vec!["one", "two", "three", "oops"]);
    }

    #[test]
    fn counts_skip_foreign_lines_and_missing_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("svc.log");
        assert_eq!(log_counts(&path), (0, 0));

        fs::write(
            &path,
            "{\"stream\":\"stdout\",\"text\":\"a\"}\nnot json\n{\"stream\":\"stderr\",\"text\":\"b\"}\n",
        )
        .unwrap();
        assert_eq!(log_counts(&path), (1, 1));
    }

    #[test]
    fn follower_only_sees_complete_new_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("svc.log");
        let mut follower = LogFollower::new(&path);
        assert!(!follower.find_text("ready").unwrap());

        fs::write(&path, "{\"stream\":\"stdout\",\"text\":\"booting\"}\n{\"stream\":\"stdout\",\"te").unwrap();
        assert!(!follower.find_text("ready").unwrap());

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"xt\":\"server ready on 8080\"}\n").unwrap();
        assert!(follower.find_text("ready").unwrap());
        assert!(!follower.find_text("ready").unwrap());
    }

    #[test]
    fn follower_restarts_after_truncation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("svc.log");
        fs::write(&path, "{\"stream\":\"stdout\",\"text\":\"first run output\"}\n").unwrap();

        let mut follower = LogFollower::new(&path);
        assert_eq!(follower.read_new().unwrap().len(), 1);

        prepare_log(&path).unwrap();
        fs::write(&path, "{\"stream\":\"stdout\",\"text\":\"up\"}\n").unwrap();
        assert!(follower.find_text("up").unwrap());
    }
}
