use serde::Serialize;
use thiserror::Error;

use crate::models::{Contest, ReturnDocument};
use crate::settings::{ContestPair, ContestSelector};
use crate::tables::Record;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecomposeError {
    #[error("precinct {precinct}: contest {selector} not found (document has {available:?})")]
    MissingContest {
        precinct: String,
        selector: String,
        available: Vec<String>,
    },
}

/// One row of `precinct_info.csv`. Absent counts are written as empty cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryRow {
    pub precinct_code: String,
    pub precinct_cluster: String,
    pub location: String,
    pub abstentions: Option<u64>,
    pub registered_voters: Option<u64>,
    pub actual_voters: Option<u64>,
    pub valid_ballots: Option<u64>,
    pub senator_over: Option<u64>,
    pub senator_under: Option<u64>,
    pub senator_valid: Option<u64>,
    pub senator_obtained: Option<u64>,
    pub party_over: Option<u64>,
    pub party_under: Option<u64>,
    pub party_valid: Option<u64>,
    pub party_obtained: Option<u64>,
}

impl Record for SummaryRow {
    const HEADER: &'static [&'static str] = &[
        "precinct_code",
        "precinct_cluster",
        "location",
        "abstentions",
        "registered_voters",
        "actual_voters",
        "valid_ballots",
        "senator_over",
        "senator_under",
        "senator_valid",
        "senator_obtained",
        "party_over",
        "party_under",
        "party_valid",
        "party_obtained",
    ];
}

/// One (precinct, candidate) row of a contest table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateRow {
    pub precinct_code: String,
    pub name: String,
    pub vote: Option<u64>,
}

impl Record for CandidateRow {
    const HEADER: &'static [&'static str] = &["precinct_code", "name", "vote"];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decomposed {
    pub summary: SummaryRow,
    pub primary: Vec<CandidateRow>,
    pub secondary: Vec<CandidateRow>,
}

pub fn decompose(doc: &ReturnDocument, contests: &ContestPair) -> Result<Decomposed, DecomposeError> {
    let info = &doc.information;
    let code = &info.precinct_id;
    let primary = find_contest(doc, &contests.primary)?;
    let secondary = find_contest(doc, &contests.secondary)?;

    let summary = SummaryRow {
        precinct_code: code.clone(),
        precinct_cluster: info.precinct_in_cluster.clone(),
        location: info.location.clone(),
        abstentions: info.abstentions,
        registered_voters: info.registered_voters,
        actual_voters: info.actual_voters,
        valid_ballots: info.valid_ballots,
        senator_over: primary.statistic.over_votes,
        senator_under: primary.statistic.under_votes,
        senator_valid: primary.statistic.valid_votes,
        senator_obtained: primary.statistic.obtained_votes,
        party_over: secondary.statistic.over_votes,
        party_under: secondary.statistic.under_votes,
        party_valid: secondary.statistic.valid_votes,
        party_obtained: secondary.statistic.obtained_votes,
    };

    Ok(Decomposed {
        summary,
        primary: candidate_rows(code, primary),
        secondary: candidate_rows(code, secondary),
    })
}

fn candidate_rows(code: &str, contest: &Contest) -> Vec<CandidateRow> {
    contest
        .candidates
        .iter()
        .map(|c| CandidateRow {
            precinct_code: code.to_string(),
            name: c.name.clone(),
            vote: c.votes,
        })
        .collect()
}

fn find_contest<'a>(
    doc: &'a ReturnDocument,
    selector: &ContestSelector,
) -> Result<&'a Contest, DecomposeError> {
    let found = match selector {
        ContestSelector::Position(idx) => doc.contests.get(*idx),
        ContestSelector::Label(label) => {
            let wanted = label.to_uppercase();
            doc.contests.iter().find(|c| {
                c.label()
                    .is_some_and(|n| n.to_uppercase().contains(&wanted))
            })
        }
    };

    found.ok_or_else(|| DecomposeError::MissingContest {
        precinct: doc.information.precinct_id.clone(),
        selector: selector.to_string(),
        available: doc
            .contests
            .iter()
            .enumerate()
            .map(|(i, c)| c.label().map_or_else(|| format!("#{}", i), str::to_string))
            .collect(),
    })
}
