//! Human-in-the-loop review of uncertain person-groups.
//!
//! The session walks uncertain groups in group-id order and asks a [`DecisionSource`]
//! for one of approve / reject / skip. Interactive prompting and batch decisions share
//! the same session logic.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::{self, BufRead, ErrorKind, Write};
use std::path::Path;

use exr_core::{ConfidenceTier, FieldRole, FieldRoles, Group, Record, ReviewDecision};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "exr-review";

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("review channel write failed: {0}")]
    Io(#[from] io::Error),
    #[error("reading decisions file {path}: {source}")]
    DecisionFileRead { path: String, source: io::Error },
    #[error("parsing decisions file {path}: {message}")]
    DecisionFileParse { path: String, message: String },
}

/// Everything a decision source may show about the group under review.
#[derive(Debug, Clone, Copy)]
pub struct GroupView<'a> {
    pub group: &'a Group,
    /// 1-based position within this session.
    pub position: usize,
    pub total: usize,
    pub records: &'a [Record],
    pub roles: &'a FieldRoles,
}

/// Capability that turns a presented group into a decision.
pub trait DecisionSource {
    /// `Ok(None)` means the channel ended (end of input or cancellation).
    fn decide(&mut self, view: &GroupView<'_>) -> Result<Option<ReviewDecision>, ReviewError>;
}

/// Case-insensitive mapping of a raw response onto a decision.
pub fn parse_response(input: &str) -> Option<ReviewDecision> {
    match input.trim().to_lowercase().as_str() {
        "yes" | "y" | "approve" | "approved" => Some(ReviewDecision::Approved),
        "no" | "n" | "reject" | "rejected" => Some(ReviewDecision::Rejected),
        "skip" | "s" | "skipped" => Some(ReviewDecision::Skipped),
        _ => None,
    }
}

fn display_or_na(value: String) -> String {
    if value.trim().is_empty() {
        "N/A".to_string()
    } else {
        value
    }
}

/// Human-readable rendering of one group: metrics, companies, then every member.
pub fn render_group(view: &GroupView<'_>, out: &mut dyn Write) -> io::Result<()> {
    let group = view.group;
    let rule = "-".repeat(80);
    writeln!(out)?;
    writeln!(out, "{rule}")?;
    writeln!(out, "GROUP {} of {}", view.position, view.total)?;
    writeln!(
        out,
        "Confidence: {}",
        group.tier().unwrap_or(ConfidenceTier::Uncertain).as_str()
    )?;
    writeln!(
        out,
        "Average Similarity: {:.1}%",
        group.avg_similarity().unwrap_or_default()
    )?;
    writeln!(out, "Number of records: {}", group.len())?;
    writeln!(out, "{rule}")?;

    if group.spans_multiple_companies() {
        writeln!(out)?;
        writeln!(out, "  This person appears at MULTIPLE companies:")?;
        for company in &group.companies {
            writeln!(out, "      - {company}")?;
        }
        writeln!(out)?;
        writeln!(
            out,
            "  NOTE: If confirmed, contributions from this person will count"
        )?;
        writeln!(
            out,
            "        towards ALL companies they're associated with."
        )?;
    }

    for (idx, record) in group.member_records(view.records).enumerate() {
        writeln!(out)?;
        writeln!(out, "  Record {}:", idx + 1)?;
        for (label, role) in [
            ("Name:    ", FieldRole::Name),
            ("Title:   ", FieldRole::Title),
            ("Company: ", FieldRole::Company),
            ("Address: ", FieldRole::Address),
        ] {
            writeln!(
                out,
                "    {label} {}",
                display_or_na(view.roles.text(record, role))
            )?;
        }
    }
    Ok(())
}

/// Interactive line-oriented source: renders each group, then blocks on one line of input.
pub struct LineDecisionSource<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> LineDecisionSource<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn read_response(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line),
            Err(err) if err.kind() == ErrorKind::Interrupted => None,
            Err(err) => {
                warn!(error = %err, "review input failed; ending session");
                None
            }
        }
    }
}

impl LineDecisionSource<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> LineDecisionSource<R, W> {
    fn prompt(&mut self, view: &GroupView<'_>) -> io::Result<Option<ReviewDecision>> {
        render_group(view, &mut self.output)?;
        let question = if view.group.spans_multiple_companies() {
            "Are these ALL records for the SAME PERSON? (yes/no/skip): "
        } else {
            "Are these the SAME person? (yes/no/skip): "
        };

        loop {
            write!(self.output, "\n{question}")?;
            self.output.flush()?;

            let Some(line) = self.read_response() else {
                writeln!(self.output, "\n  [CANCELLED] Review interrupted")?;
                return Ok(None);
            };

            match parse_response(&line) {
                Some(decision) => {
                    // the decision stands even if the confirmation cannot be shown
                    if let Err(err) = self.confirm(view, decision) {
                        warn!(error = %err, group_id = view.group.group_id, "review output failed after decision");
                    }
                    return Ok(Some(decision));
                }
                None => writeln!(self.output, "  Please enter 'yes', 'no', or 'skip'")?,
            }
        }
    }

    fn confirm(&mut self, view: &GroupView<'_>, decision: ReviewDecision) -> io::Result<()> {
        match decision {
            ReviewDecision::Approved if view.group.spans_multiple_companies() => writeln!(
                self.output,
                "  [APPROVED] Person confirmed - will be linked to {} companies",
                view.group.companies.len()
            )?,
            ReviewDecision::Approved => writeln!(self.output, "  [APPROVED] Person confirmed")?,
            ReviewDecision::Rejected => {
                writeln!(self.output, "  [REJECTED] Group marked as different people")?
            }
            ReviewDecision::Skipped => {
                writeln!(self.output, "  [SKIPPED] Group will be reviewed later")?
            }
        }
        self.output.flush()
    }
}

/// A broken output channel ends the session like end of input.
impl<R: BufRead, W: Write> DecisionSource for LineDecisionSource<R, W> {
    fn decide(&mut self, view: &GroupView<'_>) -> Result<Option<ReviewDecision>, ReviewError> {
        match self.prompt(view) {
            Ok(decision) => Ok(decision),
            Err(err) => {
                warn!(error = %err, "review output failed; ending session");
                Ok(None)
            }
        }
    }
}

/// Queue of raw responses fed through the same parser as interactive input.
/// Unrecognised entries are discarded like a re-prompt; an empty queue ends the session.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDecisions {
    responses: VecDeque<String>,
}

impl ScriptedDecisions {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: responses.into_iter().map(Into::into).collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.responses.len()
    }
}

impl DecisionSource for ScriptedDecisions {
    fn decide(&mut self, _view: &GroupView<'_>) -> Result<Option<ReviewDecision>, ReviewError> {
        while let Some(response) = self.responses.pop_front() {
            if let Some(decision) = parse_response(&response) {
                return Ok(Some(decision));
            }
        }
        Ok(None)
    }
}

/// Pre-recorded decisions keyed by group id; groups absent from the map are skipped.
#[derive(Debug, Clone, Default)]
pub struct DecisionFile {
    decisions: HashMap<usize, ReviewDecision>,
}

impl DecisionFile {
    pub fn from_decisions(decisions: HashMap<usize, ReviewDecision>) -> Self {
        Self { decisions }
    }

    /// JSON object mapping group id to `approve`, `reject` or `skip` (or any accepted synonym).
    pub fn from_json_str(text: &str, origin: &str) -> Result<Self, ReviewError> {
        let parse_err = |message: String| ReviewError::DecisionFileParse {
            path: origin.to_string(),
            message,
        };
        let raw: HashMap<String, String> =
            serde_json::from_str(text).map_err(|e| parse_err(e.to_string()))?;

        let mut decisions = HashMap::with_capacity(raw.len());
        for (key, value) in raw {
            let group_id = key
                .trim()
                .parse::<usize>()
                .map_err(|_| parse_err(format!("group id `{key}` is not a number")))?;
            let decision = parse_response(&value)
                .ok_or_else(|| parse_err(format!("group {group_id}: unknown decision `{value}`")))?;
            decisions.insert(group_id, decision);
        }
        Ok(Self { decisions })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ReviewError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ReviewError::DecisionFileRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text, &path.display().to_string())
    }
}

impl DecisionSource for DecisionFile {
    fn decide(&mut self, view: &GroupView<'_>) -> Result<Option<ReviewDecision>, ReviewError> {
        Ok(Some(
            self.decisions
                .get(&view.group.group_id)
                .copied()
                .unwrap_or(ReviewDecision::Skipped),
        ))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReviewOutcome {
    pub approved: Vec<usize>,
    pub rejected: Vec<usize>,
    pub skipped: Vec<usize>,
    /// Uncertain groups never reached because the session was interrupted.
    pub undecided: Vec<usize>,
    pub interrupted: bool,
}

impl ReviewOutcome {
    pub fn decision_for(&self, group_id: usize) -> Option<ReviewDecision> {
        if self.approved.contains(&group_id) {
            Some(ReviewDecision::Approved)
        } else if self.rejected.contains(&group_id) {
            Some(ReviewDecision::Rejected)
        } else if self.skipped.contains(&group_id) {
            Some(ReviewDecision::Skipped)
        } else {
            None
        }
    }

    pub fn is_approved(&self, group_id: usize) -> bool {
        self.approved.contains(&group_id)
    }

    fn record(&mut self, group_id: usize, decision: ReviewDecision) {
        match decision {
            ReviewDecision::Approved => self.approved.push(group_id),
            ReviewDecision::Rejected => self.rejected.push(group_id),
            ReviewDecision::Skipped => self.skipped.push(group_id),
        }
    }
}

/// Ask the source about a single group. Only uncertain groups are eligible.
pub fn review_group(
    view: &GroupView<'_>,
    source: &mut dyn DecisionSource,
) -> Result<Option<ReviewDecision>, ReviewError> {
    if view.group.tier() != Some(ConfidenceTier::Uncertain) {
        return Ok(None);
    }
    source.decide(view)
}

pub struct ReviewSession<'a> {
    records: &'a [Record],
    roles: &'a FieldRoles,
}

impl<'a> ReviewSession<'a> {
    pub fn new(records: &'a [Record], roles: &'a FieldRoles) -> Self {
        Self { records, roles }
    }

    /// Present every uncertain group in group-id order, one at a time.
    pub fn run(
        &self,
        groups: &[Group],
        source: &mut dyn DecisionSource,
    ) -> Result<ReviewOutcome, ReviewError> {
        let mut queue = groups
            .iter()
            .filter(|g| g.tier() == Some(ConfidenceTier::Uncertain))
            .collect::<Vec<_>>();
        queue.sort_by_key(|g| g.group_id);

        let total = queue.len();
        let mut outcome = ReviewOutcome::default();
        info!(uncertain = total, "starting review session");

        for (idx, group) in queue.iter().enumerate() {
            let view = GroupView {
                group,
                position: idx + 1,
                total,
                records: self.records,
                roles: self.roles,
            };
            match review_group(&view, source)? {
                Some(decision) => outcome.record(group.group_id, decision),
                None => {
                    warn!(
                        group_id = group.group_id,
                        decided = idx,
                        remaining = total - idx,
                        "review interrupted"
                    );
                    outcome.interrupted = true;
                    outcome.undecided = queue[idx..].iter().map(|g| g.group_id).collect();
                    break;
                }
            }
        }

        info!(
            approved = outcome.approved.len(),
            rejected = outcome.rejected.len(),
            skipped = outcome.skipped.len(),
            interrupted = outcome.interrupted,
            "review session finished"
        );
        Ok(outcome)
    }
}
