use crate::aggregator::FrequencyTable;
use crate::config::{Field, LogRecord};
use crate::parser::ParseStats;
use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

const RULE_WIDTH: usize = 80;

pub enum Writer {
    JsonArray(Box<dyn Write>, bool), // bool tracks if we've written the opening bracket
    Jsonl(Box<dyn Write>),
    Csv(Box<dyn Write>, bool), // bool tracks if we've written headers
    Tsv(Box<dyn Write>, bool),
}

impl Writer {
    pub fn write_record(&mut self, log: &LogRecord) -> Result<()> {
        match self {
            Writer::JsonArray(writer, is_first) => {
                if *is_first {
                    write!(writer, "[")?;
                    *is_first = false;
                } else {
                    write!(writer, ",")?;
                }
                serde_json::to_writer(&mut *writer, log)?;
            }
            Writer::Jsonl(writer) => {
                serde_json::to_writer(&mut *writer, log)?;
                writeln!(writer)?;
            }
            Writer::Csv(writer, headers_written) => {
                if !*headers_written {
                    writeln!(writer, "{}", header().join(","))?;
                    *headers_written = true;
                }
                let row: Vec<String> = columns(log).iter().map(|f| escape_csv_field(f)).collect();
                writeln!(writer, "{}", row.join(","))?;
            }
            Writer::Tsv(writer, headers_written) => {
                if !*headers_written {
                    writeln!(writer, "{}", header().join("\t"))?;
                    *headers_written = true;
                }
                let row: Vec<String> = columns(log).iter().map(|f| escape_tsv_field(f)).collect();
                writeln!(writer, "{}", row.join("\t"))?;
            }
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        match self {
            Writer::JsonArray(ref mut writer, is_first) => {
                // an empty run still has to produce a valid document
                if is_first {
                    write!(writer, "[")?;
                }
                writeln!(writer, "]")?;
                writer.flush()?;
            }
            Writer::Jsonl(ref mut writer)
            | Writer::Csv(ref mut writer, _)
            | Writer::Tsv(ref mut writer, _) => {
                writer.flush()?;
            }
        }
        Ok(())
    }
}

fn header() -> Vec<&'static str> {
    let mut names: Vec<&str> = Field::ALL.iter().map(|f| f.as_str()).collect();
    names.push("timestamp");
    names
}

fn columns(log: &LogRecord) -> Vec<String> {
    let mut values: Vec<String> = Field::ALL
        .iter()
        .map(|&f| log.get(f).unwrap_or_default())
        .collect();
    values.push(log.timestamp.map(|t| t.to_string()).unwrap_or_default());
    values
}

pub fn create_writer(output_arg: &str) -> Result<Writer> {
    match output_arg {
        "json" => Ok(Writer::JsonArray(stdout(), true)),
        "jsonl" | "ndjson" => Ok(Writer::Jsonl(stdout())),
        "csv" => Ok(Writer::Csv(stdout(), false)),
        "tsv" => Ok(Writer::Tsv(stdout(), false)),
        path if path.ends_with(".json") => Ok(Writer::JsonArray(create_file(path)?, true)),
        path if path.ends_with(".jsonl") || path.ends_with(".ndjson") => {
            Ok(Writer::Jsonl(create_file(path)?))
        }
        path if path.ends_with(".csv") => Ok(Writer::Csv(create_file(path)?, false)),
        path if path.ends_with(".tsv") => Ok(Writer::Tsv(create_file(path)?, false)),
        path => {
            // Default to JSON file if it looks like a path
            if path.contains('/') || path.contains('\\') || path.contains('.') {
                Ok(Writer::JsonArray(create_file(path)?, true))
            } else {
                Err(anyhow!(
                    "Unknown output format: {}. Use 'json', 'jsonl', 'csv', 'tsv' or a file path",
                    output_arg
                ))
            }
        }
    }
}

fn stdout() -> Box<dyn Write> {
    Box::new(BufWriter::new(io::stdout().lock()))
}

fn create_file(path: &str) -> Result<Box<dyn Write>> {
    create_parent_dirs(path)?;
    let file = File::create(path).with_context(|| format!("cannot create {path}"))?;
    Ok(Box::new(BufWriter::new(file)))
}

fn create_parent_dirs(file_path: &str) -> Result<()> {
    if let Some(parent) = Path::new(file_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn escape_csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn escape_tsv_field(field: &str) -> String {
    field
        .replace('\t', " ")
        .replace('\n', " ")
        .replace('\r', " ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    total_hits: u64,
    parse: &'a ParseStats,
    urls: Vec<crate::aggregator::RankedEntry>,
}

/// Render the ranked url report. `top` limits the listed keys, not the total.
pub fn write_report(
    out: &mut dyn Write,
    table: &FrequencyTable,
    stats: &ParseStats,
    format: ReportFormat,
    top: Option<usize>,
) -> Result<()> {
    let mut ranked = table.ranked();
    if let Some(top) = top {
        ranked.truncate(top);
    }

    match format {
        ReportFormat::Text => {
            writeln!(out, "Total hits: {}", table.total())?;
            writeln!(out, "{}", "=".repeat(RULE_WIDTH))?;
            for entry in &ranked {
                writeln!(
                    out,
                    "[{}] - {}: {}",
                    entry.key.method, entry.key.path, entry.count
                )?;
            }
        }
        ReportFormat::Json => {
            let report = JsonReport {
                total_hits: table.total(),
                parse: stats,
                urls: ranked,
            };
            serde_json::to_writer_pretty(&mut *out, &report)?;
            writeln!(out)?;
        }
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AggregationKey;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// `Write` handle whose bytes stay readable after the writer is consumed.
    #[derive(Clone, Default)]
    struct Shared(Rc<RefCell<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Shared {
        fn text(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).unwrap()
        }
    }

    fn sample() -> LogRecord {
        LogRecord {
            method: Some("GET".into()),
            path: Some("/a,b".into()),
            status_code: Some(200),
            user_agent: Some("Mozilla\t5.0".into()),
            ..Default::default()
        }
    }

    fn table() -> FrequencyTable {
        let mut table = FrequencyTable::new();
        table.add(AggregationKey::new("GET", "/static/app.css"));
        table.add(AggregationKey::new("GET", "/jsi18n/"));
        table.add(AggregationKey::new("GET", "/jsi18n/"));
        table
    }

    #[test]
    fn json_array_is_valid_for_zero_and_many_records() {
        let buf = Shared::default();
        Writer::JsonArray(Box::new(buf.clone()), true).finish().unwrap();
        assert_eq!(buf.text(), "[]\n");

        let buf = Shared::default();
        let mut writer = Writer::JsonArray(Box::new(buf.clone()), true);
        writer.write_record(&sample()).unwrap();
        writer.write_record(&sample()).unwrap();
        writer.finish().unwrap();
        let parsed: Vec<LogRecord> = serde_json::from_str(&buf.text()).unwrap();
        assert_eq!(parsed, vec![sample(), sample()]);
    }

    #[test]
    fn jsonl_is_one_object_per_line() {
        let buf = Shared::default();
        let mut writer = Writer::Jsonl(Box::new(buf.clone()));
        writer.write_record(&sample()).unwrap();
        writer.finish().unwrap();
        assert_eq!(
            buf.text(),
            "{\"method\":\"GET\",\"path\":\"/a,b\",\"status_code\":200,\"user_agent\":\"Mozilla\\t5.0\"}\n"
        );
    }

    #[test]
    fn csv_and_tsv_escape_fields() {
        let buf = Shared::default();
        let mut writer = Writer::Csv(Box::new(buf.clone()), false);
        writer.write_record(&sample()).unwrap();
        writer.finish().unwrap();
        let text = buf.text();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "ip,datetime,method,path,http_version,status_code,content_size,referrer,user_agent,timestamp"
        );
        assert_eq!(lines.next().unwrap(), ",,GET,\"/a,b\",,200,,,Mozilla\t5.0,");

        let buf = Shared::default();
        let mut writer = Writer::Tsv(Box::new(buf.clone()), false);
        writer.write_record(&sample()).unwrap();
        writer.finish().unwrap();
        assert!(buf.text().lines().nth(1).unwrap().ends_with("\tMozilla 5.0\t"));
    }

    #[test]
    fn unknown_output_format_is_rejected() {
        assert!(create_writer("yaml").is_err());
    }

    #[test]
    fn text_report_lists_ranked_keys() {
        let mut out = Vec::new();
        write_report(&mut out, &table(), &ParseStats::default(), ReportFormat::Text, None)
            .unwrap();
        let expected = format!(
            "Total hits: 3\n{}\n[GET] - /jsi18n/: 2\n[GET] - /static/app.css: 1\n",
            "=".repeat(80)
        );
        assert_eq!(String::from_utf8(out).unwrap(), expected);
    }

    #[test]
    fn top_limits_listing_not_total() {
        let mut out = Vec::new();
        write_report(&mut out, &table(), &ParseStats::default(), ReportFormat::Text, Some(1))
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Total hits: 3\n"));
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn json_report_carries_stats_and_urls() {
        let stats = ParseStats {
            lines: 4,
            blank: 0,
            parsed: 3,
            rejected: 1,
        };
        let mut out = Vec::new();
        write_report(&mut out, &table(), &stats, ReportFormat::Json, None).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["total_hits"], 3);
        assert_eq!(value["parse"]["rejected"], 1);
        assert_eq!(value["urls"][0]["path"], "/jsi18n/");
        assert_eq!(value["urls"][0]["count"], 2);
    }

    #[test]
    fn empty_report_shows_zero_hits() {
        let mut out = Vec::new();
        write_report(
            &mut out,
            &FrequencyTable::new(),
            &ParseStats::default(),
            ReportFormat::Text,
            None,
        )
        .unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("Total hits: 0\n"));
    }
}
