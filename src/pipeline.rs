//! Drivers composing parser, templater and aggregator over a line stream.

use anyhow::{Context, Result};
use serde::Deserializer as _;
use serde::de::{self, SeqAccess, Visitor};
use std::fmt;
use std::io::{self, BufRead};
use tracing::{debug, info};

use crate::aggregator::{FrequencyAggregator, FrequencyTable};
use crate::config::{Field, LogRecord};
use crate::output::Writer;
use crate::parser::{LineParser, ParseStats};
use crate::stop::StopSignal;
use crate::templater::PathTemplater;

/// Outcome of an `analyze` run.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    pub stats: ParseStats,
    pub table: FrequencyTable,
}

/// Parse every line and hand the records to `writer`.
pub fn convert<I, S>(
    lines: I,
    parser: &LineParser,
    writer: &mut Writer,
    stop: &StopSignal,
) -> Result<ParseStats>
where
    I: Iterator<Item = io::Result<S>>,
    S: AsRef<str>,
{
    let mut records = parser.records(lines).with_stop(stop.clone());
    for record in records.by_ref() {
        let record = record.context("reading input")?;
        writer.write_record(&record)?;
    }
    let stats = records.stats();
    info!(
        lines = stats.lines,
        parsed = stats.parsed,
        rejected = stats.rejected,
        "conversion done"
    );
    Ok(stats)
}

/// Parse, template and count in a single pass.
pub fn analyze<I, S>(
    lines: I,
    parser: &LineParser,
    templater: &PathTemplater,
    stop: &StopSignal,
) -> Result<Analysis>
where
    I: Iterator<Item = io::Result<S>>,
    S: AsRef<str>,
{
    parser.pattern().require(&[Field::Method, Field::Path])?;

    let mut aggregator = FrequencyAggregator::new(templater);
    let mut records = parser.records(lines).with_stop(stop.clone());
    // optional method/path groups may still be absent on a given line
    let mut incomplete = 0;
    for record in records.by_ref() {
        let record = record.context("reading input")?;
        if let Err(err) = aggregator.push(&record) {
            incomplete += 1;
            debug!(error = %err, "dropping record");
        }
    }

    let mut stats = records.stats();
    stats.parsed -= incomplete;
    stats.rejected += incomplete;
    let analysis = Analysis {
        stats,
        table: aggregator.finish(),
    };
    log_summary(&analysis);
    Ok(analysis)
}

/// Count records previously written by `convert`: either one JSON array,
/// where `null` marks a line that did not parse, or a JSON-lines stream.
pub fn analyze_json<R: BufRead>(
    mut reader: R,
    templater: &PathTemplater,
    stop: &StopSignal,
) -> Result<Analysis> {
    let mut aggregator = FrequencyAggregator::new(templater);
    let mut stats = ParseStats::default();

    let mut count = |item: Option<LogRecord>| {
        stats.lines += 1;
        match item.map(|r| aggregator.push(&r)) {
            Some(Ok(())) => stats.parsed += 1,
            Some(Err(err)) => {
                stats.rejected += 1;
                debug!(record = stats.lines, error = %err, "dropping record");
            }
            None => stats.rejected += 1,
        }
    };

    match first_non_whitespace(&mut reader).context("reading input")? {
        None => {}
        Some(b'[') => {
            let mut decoder = serde_json::Deserializer::from_reader(reader);
            let visitor = RecordSeq {
                count: &mut count,
                stop,
            };
            match (&mut decoder).deserialize_seq(visitor) {
                Ok(()) => decoder.end().context("decoding record array")?,
                Err(_) if stop.is_stopped() => {}
                Err(err) => return Err(err).context("decoding record array"),
            }
        }
        Some(_) => {
            let stream =
                serde_json::Deserializer::from_reader(reader).into_iter::<Option<LogRecord>>();
            for item in stream {
                if stop.is_stopped() {
                    break;
                }
                count(item.context("decoding record stream")?);
            }
        }
    }

    let analysis = Analysis {
        stats,
        table: aggregator.finish(),
    };
    log_summary(&analysis);
    Ok(analysis)
}

/// Feeds array elements to `count` one at a time.
struct RecordSeq<'a, F> {
    count: &'a mut F,
    stop: &'a StopSignal,
}

impl<'de, F> Visitor<'de> for RecordSeq<'_, F>
where
    F: FnMut(Option<LogRecord>),
{
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an array of log records")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
        let RecordSeq { count, stop } = self;
        loop {
            // the rest of the array stays unread
            if stop.is_stopped() {
                return Err(de::Error::custom("stopped"));
            }
            match seq.next_element::<Option<LogRecord>>()? {
                Some(item) => count(item),
                None => return Ok(()),
            }
        }
    }
}

fn log_summary(analysis: &Analysis) {
    info!(
        lines = analysis.stats.lines,
        parsed = analysis.stats.parsed,
        rejected = analysis.stats.rejected,
        keys = analysis.table.len(),
        hits = analysis.table.total(),
        "analysis done"
    );
}

/// Skip leading whitespace and report the next byte without consuming it.
fn first_non_whitespace<R: BufRead>(reader: &mut R) -> io::Result<Option<u8>> {
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Ok(None);
        }
        match buf.iter().position(|b| !b.is_ascii_whitespace()) {
            Some(i) => {
                let byte = buf[i];
                reader.consume(i);
                return Ok(Some(byte));
            }
            None => {
                let len = buf.len();
                reader.consume(len);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::PatternRegistry;
    use std::io::Cursor;

    const LOG: &str = r#"66.91.244.220 - - [21/Jan/2013:00:00:00 +0000] "GET /jsi18n/ HTTP/1.1" 200 2456 "http://x" "UA"
66.91.244.220 - - [21/Jan/2013:00:00:01 +0000] "GET /static/vendor/blitzer/jquery-ui-1.8.11.custom.css HTTP/1.1" 200 8120 "http://x" "UA"

this line is not an access log entry
66.91.244.221 - - [21/Jan/2013:00:00:02 +0000] "GET /jsi18n/ HTTP/1.1" 304 0 "-" "UA"
10.0.0.1 - - [21/Jan/2013:00:00:03 +0000] "POST /feedapi/19fa3dce8a68667ef47214c18579b59fad174470/products/?page=1 HTTP/1.1" 201 12 "-" "UA"
"#;

    fn parser() -> LineParser {
        LineParser::new(
            PatternRegistry::builtin()
                .unwrap()
                .resolve("apache2_access")
                .unwrap(),
        )
    }

    fn lines(text: &str) -> impl Iterator<Item = io::Result<&str>> {
        text.lines().map(Ok)
    }

    #[test]
    fn analyze_counts_good_lines_only() {
        let templater = PathTemplater::compile([r"/feedapi/(?P<appid>\w+)/products/"]).unwrap();
        let analysis = analyze(lines(LOG), &parser(), &templater, &StopSignal::new()).unwrap();

        assert_eq!(analysis.stats.parsed, 4);
        assert_eq!(analysis.stats.rejected, 1);
        assert_eq!(analysis.stats.blank, 1);
        assert_eq!(analysis.table.total(), 4);
        assert_eq!(analysis.table.count("GET", "/jsi18n/"), 2);
        assert_eq!(
            analysis
                .table
                .count("GET", "/static/vendor/blitzer/jquery-ui-1.8.11.custom.css"),
            1
        );
        assert_eq!(analysis.table.count("POST", "/feedapi/<appid>/products/"), 1);

        let ranked = analysis.table.ranked();
        assert_eq!(ranked[0].key.path, "/jsi18n/");
        assert_eq!(ranked[0].count, 2);
    }

    #[test]
    fn analyze_empty_input_is_zero_hits() {
        let analysis = analyze(
            lines(""),
            &parser(),
            &PathTemplater::default(),
            &StopSignal::new(),
        )
        .unwrap();
        assert_eq!(analysis.table.total(), 0);
        assert!(analysis.table.is_empty());
        assert!(!analysis.stats.all_rejected());
    }

    #[test]
    fn analyze_needs_method_and_path() {
        let parser = LineParser::new(
            PatternRegistry::empty()
                .resolve(r"(?P<ip>\S+)")
                .unwrap(),
        );
        let result = analyze(lines(LOG), &parser, &PathTemplater::default(), &StopSignal::new());
        assert!(result.is_err());
    }

    #[test]
    fn records_missing_an_optional_method_are_rejected() {
        let parser = LineParser::new(
            PatternRegistry::empty()
                .resolve(r"(?:(?P<method>[A-Z]+) )?(?P<path>/\S*)")
                .unwrap(),
        );
        let analysis = analyze(
            lines("GET /a\n/b\n"),
            &parser,
            &PathTemplater::default(),
            &StopSignal::new(),
        )
        .unwrap();
        assert_eq!(analysis.stats.parsed, 1);
        assert_eq!(analysis.stats.rejected, 1);
        assert_eq!(analysis.table.count("GET", "/a"), 1);
    }

    #[test]
    fn analyze_stops_when_signalled() {
        let stop = StopSignal::new();
        stop.stop();
        let analysis = analyze(lines(LOG), &parser(), &PathTemplater::default(), &stop).unwrap();
        assert_eq!(analysis.stats.lines, 0);
    }

    #[test]
    fn convert_writes_parsed_records() {
        let path = tempfile::Builder::new().suffix(".jsonl").tempfile().unwrap();
        let out = path.path().to_str().unwrap().to_string();
        let mut writer = crate::output::create_writer(&out).unwrap();
        let parser = parser().with_timestamps().unwrap();
        let stats = convert(lines(LOG), &parser, &mut writer, &StopSignal::new()).unwrap();
        writer.finish().unwrap();

        assert_eq!(stats.parsed, 4);
        let text = std::fs::read_to_string(path.path()).unwrap();
        let records: Vec<LogRecord> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].timestamp, Some(1_358_726_400.0));
        assert_eq!(records[3].method.as_deref(), Some("POST"));
    }

    #[test]
    fn analyze_json_array_skips_nulls() {
        let input = r#"  [
            {"method": "GET", "path": "/jsi18n/"},
            null,
            {"method": "GET", "path": "/jsi18n/?lang=en"},
            {"path": "/no-method"}
        ]"#;
        let analysis = analyze_json(
            Cursor::new(input),
            &PathTemplater::default(),
            &StopSignal::new(),
        )
        .unwrap();
        assert_eq!(analysis.stats.lines, 4);
        assert_eq!(analysis.stats.parsed, 2);
        assert_eq!(analysis.stats.rejected, 2);
        assert_eq!(analysis.table.count("GET", "/jsi18n/"), 2);
    }

    #[test]
    fn analyze_json_array_stops_when_signalled() {
        let stop = StopSignal::new();
        stop.stop();
        let input = r#"[{"method": "GET", "path": "/a"}, {"method": "GET", "path": "/b"}]"#;
        let analysis = analyze_json(Cursor::new(input), &PathTemplater::default(), &stop).unwrap();
        assert_eq!(analysis.stats.lines, 0);
        assert!(analysis.table.is_empty());
    }

    #[test]
    fn analyze_json_array_rejects_trailing_garbage() {
        let broken = analyze_json(
            Cursor::new(r#"[{"method": "GET", "path": "/a"}] {"#),
            &PathTemplater::default(),
            &StopSignal::new(),
        );
        assert!(broken.is_err());
    }

    #[test]
    fn analyze_json_lines() {
        let input = "{\"method\":\"GET\",\"path\":\"/a\"}\n{\"method\":\"PUT\",\"path\":\"/a\"}\n";
        let analysis = analyze_json(
            Cursor::new(input),
            &PathTemplater::default(),
            &StopSignal::new(),
        )
        .unwrap();
        assert_eq!(analysis.table.total(), 2);
        assert_eq!(analysis.table.len(), 2);
    }

    #[test]
    fn analyze_json_empty_and_malformed() {
        let empty = analyze_json(
            Cursor::new("  \n"),
            &PathTemplater::default(),
            &StopSignal::new(),
        )
        .unwrap();
        assert_eq!(empty.table.total(), 0);

        let broken = analyze_json(
            Cursor::new("[{\"method\": "),
            &PathTemplater::default(),
            &StopSignal::new(),
        );
        assert!(broken.is_err());
    }
}
