//! Renders section outputs as framed agent text.

use crate::cache::config::{CACHE_HINT_GRACE_SECS, CACHE_HINT_THRESHOLD_SECS};
use crate::error::Result;
use crate::runner::RunReport;
use crate::section::content::is_falsy;
use crate::section::{SectionOutput, SectionResult};
use std::collections::BTreeMap;
use std::io::Write;
use tracing::debug;

const NAMESPACE: &str = "aws";
const NO_EXCEPTIONS: &str = "No exceptions";
const ACCOUNT_LABEL: &str = "cmk/aws/account";

/// Writes one framed block per section, wrapping resource records in
/// piggyback envelopes.
pub struct OutputWriter<W: Write> {
    out: W,
    hostname: String,
}

impl<W: Write> OutputWriter<W> {
    pub fn new(out: W, hostname: &str) -> Self {
        Self {
            out,
            hostname: hostname.to_string(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Exceptions, labels and section blocks of one region pass.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` or `Error::Json` if the output cannot be written.
    pub fn write_report(&mut self, report: &RunReport, account_id: Option<&str>) -> Result<()> {
        self.write_exceptions(&report.exceptions)?;
        if let Some(account_id) = account_id {
            self.write_host_labels(account_id, &report.outputs)?;
        }
        self.write_results(&report.outputs)
    }

    /// Always emits the block, with a sentinel when nothing failed.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the output cannot be written.
    pub fn write_exceptions(&mut self, exceptions: &[String]) -> Result<()> {
        writeln!(self.out, "<<<{NAMESPACE}_exceptions>>>")?;
        if exceptions.is_empty() {
            writeln!(self.out, "{NO_EXCEPTIONS}")?;
        }
        for exception in exceptions {
            // one record per line
            writeln!(self.out, "{}", exception.replace('\n', " "))?;
        }
        Ok(())
    }

    /// The account label for this host plus the labels every piggybacked
    /// resource carries.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` or `Error::Json` if the output cannot be written.
    pub fn write_host_labels(&mut self, account_id: &str, outputs: &[SectionOutput]) -> Result<()> {
        let account: BTreeMap<String, String> =
            BTreeMap::from([(ACCOUNT_LABEL.to_string(), account_id.to_string())]);
        self.write_labels_block(&account)?;

        let mut per_host: BTreeMap<&str, BTreeMap<String, String>> = BTreeMap::new();
        for result in outputs.iter().flat_map(|output| &output.results) {
            if !self.is_piggyback(result) || result.host_labels.is_empty() {
                continue;
            }
            per_host
                .entry(&result.piggyback)
                .or_insert_with(|| account.clone())
                .extend(result.host_labels.clone());
        }
        for (host, labels) in &per_host {
            writeln!(self.out, "<<<<{host}>>>>")?;
            self.write_labels_block(labels)?;
            writeln!(self.out, "<<<<>>>>")?;
        }
        Ok(())
    }

    fn write_labels_block(&mut self, labels: &BTreeMap<String, String>) -> Result<()> {
        writeln!(self.out, "<<<labels:sep(0)>>>")?;
        writeln!(self.out, "{}", serde_json::to_string(labels)?)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `Error::Io` or `Error::Json` if the output cannot be written.
    pub fn write_results(&mut self, outputs: &[SectionOutput]) -> Result<()> {
        for output in outputs {
            if !output.results.iter().any(|r| !is_falsy(&r.content)) {
                debug!("{}: no results", output.name);
                continue;
            }
            let header = section_header(output);
            for result in &output.results {
                let piggyback = self.is_piggyback(result);
                if piggyback {
                    writeln!(self.out, "<<<<{}>>>>", result.piggyback)?;
                }
                writeln!(self.out, "{header}")?;
                writeln!(self.out, "{}", serde_json::to_string(&result.content)?)?;
                if piggyback {
                    writeln!(self.out, "<<<<>>>>")?;
                }
            }
        }
        Ok(())
    }

    fn is_piggyback(&self, result: &SectionResult) -> bool {
        !result.piggyback.is_empty() && result.piggyback != self.hostname
    }
}

/// `<<<aws_name>>>`, or `<<<name:sep(0)>>>` for label sections, with a
/// cache hint for slowly refreshed sections.
#[must_use]
pub fn section_header(output: &SectionOutput) -> String {
    let cached = if output.cache_interval > CACHE_HINT_THRESHOLD_SECS {
        format!(
            ":cached({},{})",
            output.cache_timestamp as i64,
            output.cache_interval + CACHE_HINT_GRACE_SECS
        )
    } else {
        String::new()
    };
    if output.kind.is_labels() {
        format!("<<<{}:sep(0){cached}>>>", output.name)
    } else {
        format!("<<<{NAMESPACE}_{}{cached}>>>", output.name)
    }
}
