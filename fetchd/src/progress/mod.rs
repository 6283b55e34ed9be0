//! Incremental parsing of external-tool output into progress events.
//!
//! Tools in the acquisition family print human-readable lines with no
//! guaranteed schema: a `[stage]` prefix and a percentage are the only
//! conventions worth recognizing. Anything else is passed through as a log
//! line, never dropped.

use regex::Regex;
use std::sync::OnceLock;

use crate::job::Progress;

/// Result of parsing one output line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    /// The line carried a recognizable stage and/or percentage.
    Progress(Progress),
    /// Unrecognized output, passed through verbatim.
    Log(String),
}

fn stage_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\[([A-Za-z][\w .-]*)\]").unwrap())
}

fn percent_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{1,3}(?:\.\d+)?)\s*%").unwrap())
}

fn ansi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // CSI sequences plus lone carriage returns from progress repainting.
    RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\r").unwrap())
}

/// Line parser for one tool invocation.
///
/// Holds just enough state to fill in fields the tool omits: the last seen
/// stage label, and the last percent per stage for monotonicity flagging.
#[derive(Debug, Default)]
pub struct ProgressParser {
    last_stage: Option<String>,
    last_percent: Option<f32>,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a single decoded output line.
    ///
    /// Percentages are clamped to `0..=100`. A percent lower than the
    /// previous one within the same stage is accepted but flagged
    /// `non_monotonic`; upstream tools make no ordering promises.
    pub fn parse_line(&mut self, raw: &str) -> ParsedLine {
        let clean = ansi_re().replace_all(raw, "");
        let line = clean.trim();
        if line.is_empty() {
            return ParsedLine::Log(String::new());
        }

        let stage = stage_re()
            .captures(line)
            .map(|c| c[1].trim().to_string());
        let percent = percent_re()
            .captures(line)
            .and_then(|c| c[1].parse::<f32>().ok())
            .map(|p| p.clamp(0.0, 100.0));

        if stage.is_none() && percent.is_none() {
            return ParsedLine::Log(line.to_string());
        }

        if let Some(stage) = &stage
            && self.last_stage.as_deref() != Some(stage.as_str())
        {
            self.last_stage = Some(stage.clone());
            self.last_percent = None;
        }

        let mut non_monotonic = false;
        if let Some(p) = percent {
            if let Some(last) = self.last_percent
                && p < last
            {
                non_monotonic = true;
            } else {
                self.last_percent = Some(p);
            }
        }

        ParsedLine::Progress(Progress {
            stage: self.last_stage.clone(),
            percent,
            message: line.to_string(),
            non_monotonic,
        })
    }
}
