use memchr::memchr;
use memmap2::Mmap;
use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Where the log lines come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    File(PathBuf),
    Stdin,
}

impl Input {
    /// A file path wins over `--stdin`; neither is a configuration error.
    pub fn from_args(file: Option<PathBuf>, stdin: bool) -> Result<Self, ConfigError> {
        match (file, stdin) {
            (Some(path), _) => Ok(Input::File(path)),
            (None, true) => Ok(Input::Stdin),
            (None, false) => Err(ConfigError::NoInput),
        }
    }

    /// Buffered reader over the input, for whole-document formats.
    pub fn reader(&self) -> Result<Box<dyn BufRead>, ConfigError> {
        match self {
            Input::File(path) => {
                let file = open(path)?;
                Ok(Box::new(BufReader::new(file)))
            }
            Input::Stdin => Ok(Box::new(io::stdin().lock())),
        }
    }
}

fn open(path: &Path) -> Result<File, ConfigError> {
    File::open(path).map_err(|source| ConfigError::Unreadable {
        path: path.to_path_buf(),
        source,
    })
}

/// An opened input. Files are memory-mapped so pages load as lines are
/// reached; streams are read through a blocking buffered reader.
pub enum LineSource {
    Mapped(Mmap),
    Stream(Box<dyn BufRead>),
    Empty,
}

impl LineSource {
    pub fn open(input: &Input) -> Result<Self, ConfigError> {
        let path = match input {
            Input::Stdin => return Ok(LineSource::Stream(Box::new(io::stdin().lock()))),
            Input::File(path) => path,
        };
        let unreadable = |source| ConfigError::Unreadable {
            path: path.clone(),
            source,
        };

        let file = open(path)?;
        let metadata = file.metadata().map_err(unreadable)?;
        // fifos, process substitution and /proc files report a length of 0
        if !metadata.is_file() {
            return Ok(LineSource::Stream(Box::new(BufReader::new(file))));
        }
        if metadata.len() == 0 {
            return Ok(LineSource::Empty);
        }
        // SAFETY: the map is read-only; a log rotated underneath us may yield
        // torn lines, which are then rejected like any other bad line
        let mmap = unsafe { Mmap::map(&file) }.map_err(unreadable)?;
        Ok(LineSource::Mapped(mmap))
    }

    pub fn from_reader(reader: impl BufRead + 'static) -> Self {
        LineSource::Stream(Box::new(reader))
    }

    pub fn lines(&mut self) -> Lines<'_> {
        match self {
            LineSource::Mapped(mmap) => Lines::Mapped {
                data: &mmap[..],
                pos: 0,
            },
            LineSource::Stream(reader) => {
                let reader: &mut dyn BufRead = reader.as_mut();
                Lines::Stream(reader.lines())
            }
            LineSource::Empty => Lines::Empty,
        }
    }
}

/// Lines without their terminator. Non-UTF-8 lines come out as
/// `ErrorKind::InvalidData` errors.
pub enum Lines<'a> {
    Mapped { data: &'a [u8], pos: usize },
    Stream(io::Lines<&'a mut dyn BufRead>),
    Empty,
}

impl<'a> Iterator for Lines<'a> {
    type Item = io::Result<Cow<'a, str>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Lines::Mapped { data, pos } => {
                let data: &'a [u8] = *data;
                if *pos >= data.len() {
                    return None;
                }
                let rest = &data[*pos..];
                let (line, advance) = match memchr(b'\n', rest) {
                    Some(nl) => (&rest[..nl], nl + 1),
                    None => (rest, rest.len()),
                };
                *pos += advance;
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                Some(
                    std::str::from_utf8(line)
                        .map(Cow::Borrowed)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
                )
            }
            Lines::Stream(lines) => lines.next().map(|r| r.map(Cow::Owned)),
            Lines::Empty => None,
        }
    }
}
