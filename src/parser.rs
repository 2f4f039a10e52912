use serde::Serialize;
use std::io;
use tracing::debug;

use crate::config::{Field, LogRecord};
use crate::error::{ConfigError, RecordError};
use crate::normalizer;
use crate::patterns::StructuralPattern;
use crate::stop::StopSignal;

/// Turns lines into [`LogRecord`]s with one structural pattern.
#[derive(Debug, Clone)]
pub struct LineParser {
    pattern: StructuralPattern,
    timestamps: bool,
}

impl LineParser {
    pub fn new(pattern: StructuralPattern) -> Self {
        LineParser {
            pattern,
            timestamps: false,
        }
    }

    /// Also fill `timestamp` from the captured `datetime`. Lines whose
    /// datetime cannot be read are then rejected.
    pub fn with_timestamps(mut self) -> Result<Self, ConfigError> {
        self.pattern.require(&[Field::Datetime])?;
        self.timestamps = true;
        Ok(self)
    }

    pub fn pattern(&self) -> &StructuralPattern {
        &self.pattern
    }

    /// Parse one non-blank line. A trailing newline is tolerated.
    pub fn parse_line(&self, line: &str) -> Result<LogRecord, RecordError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let caps = self.pattern.captures(line).ok_or(RecordError::NoMatch)?;

        let mut record = LogRecord::default();
        for &field in self.pattern.fields() {
            // optional groups that did not participate stay absent
            if let Some(m) = caps.name(field.as_str()) {
                record.set(field, m.as_str())?;
            }
        }

        if self.timestamps {
            if let Some(raw) = record.datetime.as_deref() {
                record.timestamp = Some(normalizer::normalize(raw)?);
            }
        }
        Ok(record)
    }

    /// Lazily parse `lines`, skipping blank lines and dropping the ones that
    /// fail. Only I/O errors of the source are yielded.
    pub fn records<I, S>(&self, lines: I) -> Records<'_, I>
    where
        I: Iterator<Item = io::Result<S>>,
        S: AsRef<str>,
    {
        Records {
            parser: self,
            lines,
            stats: ParseStats::default(),
            stop: None,
        }
    }
}

/// Line tallies of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseStats {
    pub lines: u64,
    pub blank: u64,
    pub parsed: u64,
    pub rejected: u64,
}

impl ParseStats {
    /// Some input was there but nothing matched; usually the wrong pattern.
    pub fn all_rejected(&self) -> bool {
        self.rejected > 0 && self.parsed == 0
    }
}

pub struct Records<'p, I> {
    parser: &'p LineParser,
    lines: I,
    stats: ParseStats,
    stop: Option<StopSignal>,
}

impl<I> Records<'_, I> {
    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn stats(&self) -> ParseStats {
        self.stats
    }

    fn reject(&mut self, err: &RecordError) {
        self.stats.rejected += 1;
        debug!(line = self.stats.lines, error = %err, "dropping line");
    }
}

impl<I, S> Iterator for Records<'_, I>
where
    I: Iterator<Item = io::Result<S>>,
    S: AsRef<str>,
{
    type Item = io::Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.stop.as_ref().is_some_and(StopSignal::is_stopped) {
                debug!(lines = self.stats.lines, "stop requested");
                return None;
            }

            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                    self.stats.lines += 1;
                    self.reject(&RecordError::InvalidUtf8);
                    continue;
                }
                Err(err) => return Some(Err(err)),
            };
            self.stats.lines += 1;

            let line = line.as_ref();
            if line.trim().is_empty() {
                self.stats.blank += 1;
                continue;
            }

            match self.parser.parse_line(line) {
                Ok(record) => {
                    self.stats.parsed += 1;
                    return Some(Ok(record));
                }
                Err(err) => self.reject(&err),
            }
        }
    }
}
