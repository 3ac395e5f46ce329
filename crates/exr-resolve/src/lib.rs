//! Entity-resolution engine: normalization, weighted scoring, star clustering,
//! confidence tiering and consolidation of approved groups.

use exr_core::{
    value_text, ConfidenceTier, FieldRole, FieldRoles, Group, GroupConfidence, PersonEntity, Record,
    Variation,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strsim::levenshtein;
use thiserror::Error;
use tracing::{debug, info};

pub const CRATE_NAME: &str = "exr-resolve";

pub const DEFAULT_GROUPING_THRESHOLD: f64 = 75.0;
pub const DEFAULT_UNCERTAINTY_THRESHOLD: f64 = 85.0;

/// Title values that are artifacts of absent data rather than real titles.
const PLACEHOLDER_TITLES: [&str; 3] = ["", "nan", "none"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    TokenSort,
    Plain,
}

/// Per-role weights, in hundredths so that equal sub-scores average back exactly.
const ROLE_WEIGHTS: [(FieldRole, f64, Comparison); 4] = [
    (FieldRole::Name, 50.0, Comparison::TokenSort),
    (FieldRole::Address, 25.0, Comparison::TokenSort),
    (FieldRole::Title, 15.0, Comparison::TokenSort),
    (FieldRole::Company, 10.0, Comparison::Plain),
];

#[derive(Debug, Error, PartialEq)]
pub enum ThresholdError {
    #[error("{name} threshold {value} must be a finite value within [0, 100]")]
    OutOfRange { name: &'static str, value: f64 },
    #[error("grouping threshold {grouping} exceeds uncertainty threshold {uncertainty}")]
    Inverted { grouping: f64, uncertainty: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub grouping_threshold: f64,
    pub uncertainty_threshold: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            grouping_threshold: DEFAULT_GROUPING_THRESHOLD,
            uncertainty_threshold: DEFAULT_UNCERTAINTY_THRESHOLD,
        }
    }
}

impl Thresholds {
    pub fn new(grouping_threshold: f64, uncertainty_threshold: f64) -> Result<Self, ThresholdError> {
        let thresholds = Self {
            grouping_threshold,
            uncertainty_threshold,
        };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<(), ThresholdError> {
        for (name, value) in [
            ("grouping", self.grouping_threshold),
            ("uncertainty", self.uncertainty_threshold),
        ] {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(ThresholdError::OutOfRange { name, value });
            }
        }
        if self.grouping_threshold > self.uncertainty_threshold {
            return Err(ThresholdError::Inverted {
                grouping: self.grouping_threshold,
                uncertainty: self.uncertainty_threshold,
            });
        }
        Ok(())
    }

    pub fn tier_for(&self, avg_similarity: f64) -> ConfidenceTier {
        if avg_similarity >= self.uncertainty_threshold {
            ConfidenceTier::High
        } else if avg_similarity >= self.grouping_threshold {
            ConfidenceTier::Uncertain
        } else {
            ConfidenceTier::Low
        }
    }
}

/// Canonical comparison form: trimmed, lower-cased, inner whitespace collapsed.
pub fn normalize_text(input: &str) -> String {
    input
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Missing and null values normalize to the empty string.
pub fn normalize(value: Option<&Value>) -> String {
    value
        .map(|v| normalize_text(&value_text(v)))
        .unwrap_or_default()
}

pub fn normalized_role(record: &Record, roles: &FieldRoles, role: FieldRole) -> String {
    normalize(roles.column(role).and_then(|column| record.get(column)))
}

/// Edit-distance percentage: `100 * (1 - levenshtein / (len_a + len_b))`.
pub fn plain_similarity(a: &str, b: &str) -> f64 {
    let total = a.chars().count() + b.chars().count();
    if total == 0 {
        return 100.0;
    }
    let distance = levenshtein(a, b);
    100.0 * (1.0 - distance as f64 / total as f64)
}

pub fn token_sort(input: &str) -> String {
    let mut tokens = input.split_whitespace().collect::<Vec<_>>();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Word-order insensitive similarity ("Smith John" == "John Smith").
pub fn token_sort_similarity(a: &str, b: &str) -> f64 {
    plain_similarity(&token_sort(a), &token_sort(b))
}

/// Normalized (and token-sorted where needed) role values of one record, computed once
/// so the O(N^2) clustering pass never re-normalizes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoringFields {
    values: [String; 4],
}

impl ScoringFields {
    pub fn from_record(record: &Record, roles: &FieldRoles) -> Self {
        let mut values: [String; 4] = Default::default();
        for (slot, (role, _, comparison)) in values.iter_mut().zip(ROLE_WEIGHTS.iter()) {
            let normalized = normalized_role(record, roles, *role);
            *slot = match comparison {
                Comparison::TokenSort => token_sort(&normalized),
                Comparison::Plain => normalized,
            };
        }
        Self { values }
    }

    pub fn is_degenerate(&self) -> bool {
        self.values.iter().all(String::is_empty)
    }

    /// Weighted average over the roles present on both sides; 0.0 when none are.
    pub fn score(&self, other: &ScoringFields) -> f64 {
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for ((a, b), (_, weight, _)) in self
            .values
            .iter()
            .zip(other.values.iter())
            .zip(ROLE_WEIGHTS.iter())
        {
            if a.is_empty() || b.is_empty() {
                continue;
            }
            weighted += plain_similarity(a, b) * weight;
            total_weight += weight;
        }
        if total_weight == 0.0 {
            0.0
        } else {
            weighted / total_weight
        }
    }
}

pub fn score(a: &Record, b: &Record, roles: &FieldRoles) -> f64 {
    ScoringFields::from_record(a, roles).score(&ScoringFields::from_record(b, roles))
}

/// Result of a cluster + classify pass over one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub groups: Vec<Group>,
    pub total_records: usize,
}

impl Resolution {
    pub fn groups_with_tier(&self, tier: ConfidenceTier) -> impl Iterator<Item = &Group> {
        self.groups.iter().filter(move |g| g.tier() == Some(tier))
    }

    pub fn uncertain(&self) -> impl Iterator<Item = &Group> {
        self.groups_with_tier(ConfidenceTier::Uncertain)
    }

    pub fn group(&self, group_id: usize) -> Option<&Group> {
        self.groups.iter().find(|g| g.group_id == group_id)
    }

    pub fn grouped_records(&self) -> usize {
        self.groups.iter().map(Group::len).sum()
    }
}

pub struct ResolveEngine {
    thresholds: Thresholds,
}

impl ResolveEngine {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Star clustering: membership is tested only against each group's seed, never
    /// transitively against the other members.
    pub fn cluster(&self, records: &[Record], roles: &FieldRoles) -> Vec<Group> {
        let fields = records
            .iter()
            .map(|r| ScoringFields::from_record(r, roles))
            .collect::<Vec<_>>();
        let mut assigned = vec![false; records.len()];
        let mut groups = Vec::new();

        for i in 0..records.len() {
            if assigned[i] {
                continue;
            }
            assigned[i] = true;
            let mut members = vec![i];

            for j in (i + 1)..records.len() {
                if assigned[j] {
                    continue;
                }
                if fields[i].score(&fields[j]) >= self.thresholds.grouping_threshold {
                    members.push(j);
                    assigned[j] = true;
                }
            }

            if members.len() < 2 {
                continue;
            }

            let mut companies: Vec<String> = Vec::new();
            for &idx in &members {
                let company = normalized_role(&records[idx], roles, FieldRole::Company);
                if !company.is_empty() && !companies.contains(&company) {
                    companies.push(company);
                }
            }

            let group = Group {
                group_id: groups.len(),
                person_name: normalized_role(&records[i], roles, FieldRole::Name),
                members,
                companies,
                confidence: None,
            };
            debug!(
                group_id = group.group_id,
                seed = i,
                members = group.members.len(),
                companies = group.companies.len(),
                "group formed"
            );
            groups.push(group);
        }

        groups
    }

    /// Mean pairwise score over every unordered member pair.
    pub fn average_similarity(&self, group: &Group, records: &[Record], roles: &FieldRoles) -> f64 {
        let fields = group
            .member_records(records)
            .map(|r| ScoringFields::from_record(r, roles))
            .collect::<Vec<_>>();
        let mut total = 0.0;
        let mut pairs = 0usize;
        for a in 0..fields.len() {
            for b in (a + 1)..fields.len() {
                total += fields[a].score(&fields[b]);
                pairs += 1;
            }
        }
        if pairs == 0 {
            0.0
        } else {
            total / pairs as f64
        }
    }

    pub fn classify(&self, groups: &mut [Group], records: &[Record], roles: &FieldRoles) {
        for group in groups.iter_mut() {
            let avg_similarity = self.average_similarity(group, records, roles);
            let tier = self.thresholds.tier_for(avg_similarity);
            group.confidence = Some(GroupConfidence {
                avg_similarity,
                tier,
            });
        }
    }

    pub fn resolve(&self, records: &[Record], roles: &FieldRoles) -> Resolution {
        let mut groups = self.cluster(records, roles);
        self.classify(&mut groups, records, roles);

        let resolution = Resolution {
            groups,
            total_records: records.len(),
        };
        info!(
            records = resolution.total_records,
            groups = resolution.groups.len(),
            grouped_records = resolution.grouped_records(),
            uncertain = resolution.groups_with_tier(ConfidenceTier::Uncertain).count(),
            high = resolution.groups_with_tier(ConfidenceTier::High).count(),
            low = resolution.groups_with_tier(ConfidenceTier::Low).count(),
            grouping_threshold = self.thresholds.grouping_threshold,
            uncertainty_threshold = self.thresholds.uncertainty_threshold,
            "resolution complete"
        );
        resolution
    }
}

fn is_placeholder_title(title: &str) -> bool {
    let lowered = title.to_lowercase();
    PLACEHOLDER_TITLES.contains(&lowered.as_str())
}

/// Merge an approved group into one canonical person. Pure; performs no I/O.
pub fn consolidate(group: &Group, records: &[Record], roles: &FieldRoles) -> PersonEntity {
    let members = group.member_records(records).collect::<Vec<_>>();

    let mut best: Option<(&Record, usize)> = None;
    for &record in &members {
        let populated = record.populated_field_count();
        if best.map_or(true, |(_, count)| populated > count) {
            best = Some((record, populated));
        }
    }

    let (name, address) = best
        .map(|(record, _)| {
            (
                roles.text(record, FieldRole::Name),
                roles.text(record, FieldRole::Address),
            )
        })
        .unwrap_or_default();

    let mut titles: Vec<String> = Vec::new();
    for record in &members {
        let title = roles.text(record, FieldRole::Title).trim().to_string();
        if !is_placeholder_title(&title) && !titles.contains(&title) {
            titles.push(title);
        }
    }

    let all_variations = members
        .iter()
        .map(|record| Variation {
            name: roles.text(record, FieldRole::Name),
            title: roles.text(record, FieldRole::Title),
            company: roles.text(record, FieldRole::Company),
            address: roles.text(record, FieldRole::Address),
        })
        .collect();

    PersonEntity {
        name,
        address,
        companies: group.companies.clone(),
        grouped_from: members.len(),
        all_variations,
        titles,
    }
}
