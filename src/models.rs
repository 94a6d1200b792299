//! Wire types for the results API.
//!
//! The live payloads are loose about types (codes arrive as numbers or
//! strings, counts sometimes as strings or null), so most fields go through the
//! helpers in [`de`].

use serde::{Deserialize, Serialize};

/// One entry of the region/province/city/barangay/precinct hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminNode {
    #[serde(default, deserialize_with = "de::opt_string")]
    pub category_code: Option<String>,
    #[serde(default, alias = "parentCode", deserialize_with = "de::opt_string")]
    pub master_code: Option<String>,
    #[serde(deserialize_with = "de::string")]
    pub code: String,
    #[serde(default, deserialize_with = "de::string")]
    pub name: String,
}

impl AdminNode {
    /// Synthetic parent of all regions.
    pub fn root(code: &str) -> Self {
        AdminNode {
            category_code: None,
            master_code: None,
            code: code.to_string(),
            name: "region".to_string(),
        }
    }
}

/// Body of the `local` and `precinct` endpoints.
#[derive(Debug, Deserialize)]
pub struct NodeListing {
    pub regions: Option<Vec<AdminNode>>,
}

/// Per-precinct election return.
#[derive(Debug, Clone, Deserialize)]
pub struct ReturnDocument {
    pub information: Information,
    #[serde(alias = "national")]
    pub contests: Vec<Contest>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Information {
    #[serde(deserialize_with = "de::string")]
    pub precinct_id: String,
    #[serde(default, deserialize_with = "de::string")]
    pub precinct_in_cluster: String,
    #[serde(default, deserialize_with = "de::string")]
    pub location: String,
    #[serde(default, deserialize_with = "de::count")]
    pub abstentions: Option<u64>,
    #[serde(
        rename = "numberOfRegisteredVoters",
        alias = "registeredVoters",
        default,
        deserialize_with = "de::count"
    )]
    pub registered_voters: Option<u64>,
    #[serde(
        rename = "numberOfActuallyVoters",
        alias = "actualVoters",
        default,
        deserialize_with = "de::count"
    )]
    pub actual_voters: Option<u64>,
    #[serde(
        rename = "numberOfValidBallot",
        alias = "validBallots",
        default,
        deserialize_with = "de::count"
    )]
    pub valid_ballots: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Contest {
    #[serde(default, deserialize_with = "de::opt_string")]
    pub name: Option<String>,
    #[serde(default, rename = "contestName", deserialize_with = "de::opt_string")]
    pub contest_name: Option<String>,
    pub statistic: Statistic,
    #[serde(deserialize_with = "de::candidates")]
    pub candidates: Vec<Candidate>,
}

impl Contest {
    /// `contestName` as sent by the live API, else `name`.
    pub fn label(&self) -> Option<&str> {
        self.contest_name.as_deref().or(self.name.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistic {
    #[serde(default, deserialize_with = "de::count")]
    pub over_votes: Option<u64>,
    #[serde(default, deserialize_with = "de::count")]
    pub under_votes: Option<u64>,
    #[serde(default, deserialize_with = "de::count")]
    pub valid_votes: Option<u64>,
    #[serde(default, deserialize_with = "de::count")]
    pub obtained_votes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Candidate {
    #[serde(deserialize_with = "de::string")]
    pub name: String,
    #[serde(default, deserialize_with = "de::count")]
    pub votes: Option<u64>,
}

pub(crate) mod de {
    use serde::de::{Deserializer, Error};
    use serde::Deserialize;
    use serde_json::Value;

    use super::Candidate;

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        match Value::deserialize(d)? {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            Value::Null => Ok(String::new()),
            other => Err(D::Error::custom(format!(
                "expected string or number, got {}",
                other
            ))),
        }
    }

    pub fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let s = string(d)?;
        Ok(if s.is_empty() { None } else { Some(s) })
    }

    /// Non-negative integer, or `None` for null, blank and anything else
    /// that is not a count. Never fails, so one odd field cannot drop a
    /// whole record.
    pub fn count<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Number(n) => n.as_u64().or_else(|| {
                n.as_f64()
                    .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64)
                    .map(|f| f as u64)
            }),
            Value::String(s) => s.trim().replace(',', "").parse().ok(),
            _ => None,
        })
    }

    /// Accepts either a bare list or `{"candidates": [...]}`.
    pub fn candidates<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Candidate>, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum CandidateList {
            Flat(Vec<Candidate>),
            Nested { candidates: Vec<Candidate> },
        }

        Ok(match CandidateList::deserialize(d)? {
            CandidateList::Flat(list) => list,
            CandidateList::Nested { candidates } => candidates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.json", name)).unwrap()
    }

    #[test]
    fn live_return_shape() {
        let doc: ReturnDocument = serde_json::from_str(&fixture("er_live")).unwrap();
        assert_eq!(doc.information.precinct_id, "13010001");
        assert_eq!(doc.information.registered_voters, Some(812));
        assert_eq!(doc.information.actual_voters, Some(640));
        assert_eq!(doc.contests.len(), 2);
        assert_eq!(doc.contests[0].candidates.len(), 3);
        assert_eq!(doc.contests[1].candidates[0].votes, Some(57));
        assert_eq!(doc.contests[1].label(), Some("PARTY LIST of PHILIPPINES"));
    }

    #[test]
    fn flat_return_shape() {
        let doc: ReturnDocument = serde_json::from_str(&fixture("er_flat")).unwrap();
        assert_eq!(doc.information.valid_ballots, Some(9));
        assert_eq!(doc.contests[0].candidates.len(), 2);
        assert_eq!(doc.contests[1].statistic.over_votes, Some(1));
    }

    #[test]
    fn missing_contests_is_an_error() {
        let body = r#"{"information": {"precinctId": "1", "abstentions": 0,
            "registeredVoters": 1, "actualVoters": 1, "validBallots": 1}}"#;
        let err = serde_json::from_str::<ReturnDocument>(body).unwrap_err();
        assert!(err.to_string().contains("contests"));
    }

    #[test]
    fn node_codes_accept_numbers() {
        let body = r#"{"regions": [
            {"categoryCode": 2, "masterCode": "0", "code": 13, "name": "NCR"},
            {"categoryCode": null, "code": "14", "name": "CAR"}
        ]}"#;
        let listing: NodeListing = serde_json::from_str(body).unwrap();
        let nodes = listing.regions.unwrap();
        assert_eq!(nodes[0].code, "13");
        assert_eq!(nodes[0].category_code.as_deref(), Some("2"));
        assert_eq!(nodes[1].category_code, None);
        assert_eq!(nodes[1].master_code, None);
    }

    #[test]
    fn counts_from_strings() {
        let c: Candidate = serde_json::from_str(r#"{"name": "A", "votes": "1,204"}"#).unwrap();
        assert_eq!(c.votes, Some(1204));
        let c: Candidate = serde_json::from_str(r#"{"name": "A", "votes": 7.0}"#).unwrap();
        assert_eq!(c.votes, Some(7));
    }

    #[test]
    fn absent_counts_are_empty() {
        for raw in ["null", "\"\"", "-1", "2.5", "\"n/a\""] {
            let body = format!(r#"{{"name": "A", "votes": {}}}"#, raw);
            let c: Candidate = serde_json::from_str(&body).unwrap();
            assert_eq!(c.votes, None, "votes = {}", raw);
        }
        let c: Candidate = serde_json::from_str(r#"{"name": "A"}"#).unwrap();
        assert_eq!(c.votes, None);
    }

    #[test]
    fn contest_name_and_label_together() {
        let body = r#"{"name": "senator", "contestName": "SENATOR of PHILIPPINES",
            "statistic": {"overVotes": 0, "underVotes": 0, "validVotes": 0, "obtainedVotes": 0},
            "candidates": []}"#;
        let c: Contest = serde_json::from_str(body).unwrap();
        assert_eq!(c.label(), Some("SENATOR of PHILIPPINES"));
        assert_eq!(c.name.as_deref(), Some("senator"));
    }
}
