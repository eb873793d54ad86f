//! Explain command implementation.
//!
//! Pretty-prints a saved JSON report: header, the top objects with their
//! worst cache lines, then the page, site, and lock sections.

use std::io::Write;
use std::path::PathBuf;

use serde_json::Value;

use crate::error::{NlenstError, Result};

/// Arguments for the explain command.
#[derive(Debug, Clone, Default)]
pub struct ExplainArgs {
    /// Enable verbose output.
    pub verbose: bool,
    /// Path to the saved JSON report.
    pub input: PathBuf,
    /// Limit the number of entries shown per section.
    pub top: Option<usize>,
}

/// Explain command handler.
pub struct ExplainCommand {
    args: ExplainArgs,
}

impl ExplainCommand {
    /// Create a new ExplainCommand.
    pub fn new(args: ExplainArgs) -> Self {
        Self { args }
    }

    /// Execute the command.
    pub fn run(&self) -> Result<()> {
        let report = self.load_report()?;
        let mut stdout = std::io::stdout().lock();
        self.render(&report, &mut stdout)?;
        Ok(())
    }

    /// Load and parse the saved report.
    fn load_report(&self) -> Result<Value> {
        let text = std::fs::read_to_string(&self.args.input).map_err(|err| {
            NlenstError::Validation(format!(
                "cannot read report {}: {err}",
                self.args.input.display()
            ))
        })?;
        let value: Value = serde_json::from_str(&text)?;
        if !value.is_object() || value.get("header").is_none() {
            return Err(NlenstError::Validation(format!(
                "{} is not a NumaLens report",
                self.args.input.display()
            )));
        }
        Ok(value)
    }

    /// How many entries to show per section.
    fn limit(&self) -> usize {
        self.args.top.unwrap_or(10)
    }

    /// Render the report summary.
    fn render(&self, report: &Value, out: &mut impl Write) -> Result<()> {
        self.render_header(report, out)?;
        self.render_objects(report, out)?;
        self.render_section(report, "pages", "shared pages", out, |page| {
            format!(
                "page {} first-touch thread {}  remote reads {} writes {}",
                hex(&page["page_base"]),
                page["first_touch_thread"],
                page["reads_remote"],
                page["writes_remote"]
            )
        })?;
        self.render_section(report, "sites", "allocation sites", out, |site| {
            format!(
                "site {}  {} allocated / {} freed, {} bytes, invalidations {}",
                hex(&site["fingerprint"]),
                site["objects_allocated"],
                site["objects_freed"],
                site["bytes_allocated"],
                site["invalidations"]
            )
        })?;
        self.render_section(report, "locks", "contended locks", out, |lock| {
            format!(
                "lock {}  contended acquires {}",
                hex(&lock["lock_address"]),
                lock["contended_acquires"]
            )
        })?;
        if self.args.verbose {
            self.render_counters(report, out)?;
        }
        Ok(())
    }

    fn render_header(&self, report: &Value, out: &mut impl Write) -> Result<()> {
        let header = &report["header"];
        writeln!(
            out,
            "NumaLens report v{} generated {}",
            header["version"].as_str().unwrap_or("?"),
            header["generated_at"].as_str().unwrap_or("?")
        )?;
        writeln!(
            out,
            "thresholds: page {} / line {}",
            header["config"]["page_detail_threshold"], header["config"]["cache_detail_threshold"]
        )?;
        Ok(())
    }

    fn render_objects(&self, report: &Value, out: &mut impl Write) -> Result<()> {
        let objects = report["objects"].as_array().cloned().unwrap_or_default();
        writeln!(out, "\nObjects ({} reported):", objects.len())?;
        for object in objects.iter().take(self.limit()) {
            writeln!(
                out,
                "  {} size {} score {}  accesses {}+{}  invalidations {}",
                hex(&object["start_address"]),
                object["size"],
                object["score"],
                object["accesses_by_alloc_thread"],
                object["accesses_by_others"],
                object["invalidations_attributed"]
            )?;
            for line in object["top_lines"].as_array().cloned().unwrap_or_default() {
                writeln!(
                    out,
                    "    line {} owner thread {}  invalidations {}+{}",
                    hex(&line["line_base"]),
                    line["owner_thread"],
                    line["invalidations_first"],
                    line["invalidations_others"]
                )?;
            }
        }
        Ok(())
    }

    fn render_section(
        &self,
        report: &Value,
        key: &str,
        title: &str,
        out: &mut impl Write,
        describe: impl Fn(&Value) -> String,
    ) -> Result<()> {
        let entries = report[key].as_array().cloned().unwrap_or_default();
        writeln!(out, "\n{} ({} reported):", capitalize(title), entries.len())?;
        for entry in entries.iter().take(self.limit()) {
            writeln!(out, "  {}", describe(entry))?;
        }
        Ok(())
    }

    fn render_counters(&self, report: &Value, out: &mut impl Write) -> Result<()> {
        writeln!(out, "\nCounters:")?;
        if let Some(counters) = report["counters"].as_object() {
            for (name, value) in counters {
                writeln!(out, "  {name}: {value}")?;
            }
        }
        Ok(())
    }
}

/// Render a JSON integer as hex, falling back to the raw value.
fn hex(value: &Value) -> String {
    match value.as_u64() {
        Some(n) => format!("{n:#x}"),
        None => value.to_string(),
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Run the explain command.
pub fn run_explain(args: ExplainArgs) -> Result<()> {
    let command = ExplainCommand::new(args);
    command.run()
}
