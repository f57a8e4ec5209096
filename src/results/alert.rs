//! User-facing alerts attached to a result set.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A proposed follow-up query attached to an alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedQuery {
    pub description: String,
    pub query: String,
}

/// An advisory message about a completed (possibly degraded) search. When
/// several jobs produce alerts, the highest priority wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub priority: u32,
    pub title: String,
    pub description: Option<String>,
    pub proposed_queries: Vec<ProposedQuery>,
}

impl Alert {
    /// Pick the higher-priority of two optional alerts.
    pub fn max(a: Option<Alert>, b: Option<Alert>) -> Option<Alert> {
        match (a, b) {
            (Some(a), Some(b)) => Some(if b.priority > a.priority { b } else { a }),
            (a, b) => a.or(b),
        }
    }

    /// Suggest retrying with a longer `timeout:` after a deadline expired.
    pub fn for_timeout(used: Duration) -> Alert {
        let suggested = longer(2, used);
        Alert {
            priority: 0,
            title: "Timed out while searching".into(),
            description: Some(format!(
                "We weren't able to find any results in that time. Try adding timeout:{} to your query.",
                format_duration(suggested)
            )),
            proposed_queries: Vec::new(),
        }
    }

    pub fn for_no_resolved_repos() -> Alert {
        Alert {
            priority: 3,
            title: "No repositories found".into(),
            description: Some(
                "Your repo: filters matched no repositories. Check the filter patterns.".into(),
            ),
            proposed_queries: Vec::new(),
        }
    }

    pub fn for_missing_repo_revs(examples: Vec<String>) -> Alert {
        Alert {
            priority: 6,
            title: "Some repositories could not be searched at the requested revision".into(),
            description: Some(format!("Unknown revisions: {}", examples.join(", "))),
            proposed_queries: Vec::new(),
        }
    }

    /// The `repo:` filters matched more repositories than one search will
    /// resolve; only the first `limit` were scanned.
    pub fn for_truncated_repos(limit: usize) -> Alert {
        Alert {
            priority: 4,
            title: "Too many matching repositories".into(),
            description: Some(format!(
                "Only the first {limit} repositories matched by your repo: filters were searched. Narrow the filters to search the rest."
            )),
            proposed_queries: Vec::new(),
        }
    }

    /// Diff and commit search only run against a bounded repository set.
    pub fn for_over_repo_limit(limit: usize, narrowed: Option<String>) -> Alert {
        let proposed_queries = narrowed
            .map(|query| {
                vec![ProposedQuery {
                    description: format!("in the {limit} repositories matched first"),
                    query,
                }]
            })
            .unwrap_or_default();
        Alert {
            priority: 5,
            title: "Too many matching repositories".into(),
            description: Some(format!(
                "Commit and diff search can only run over at most {limit} repositories. Add repo: filters to narrow the search."
            )),
            proposed_queries,
        }
    }
}

/// A duration at least `n` times `dt`, rounded up to a unit a person would
/// type, with a two second floor.
pub fn longer(n: u64, dt: Duration) -> Duration {
    let mut dt2 = Duration::from_nanos(n * dt.as_nanos() as u64);
    let hour = Duration::from_secs(3600);
    let minute = Duration::from_secs(60);
    let second = Duration::from_secs(1);
    if dt2 < hour {
        let t = dt2.as_secs();
        if dt2 > minute {
            // round up to the minute
            dt2 = Duration::from_secs(t.div_ceil(60) * 60);
        } else {
            // round up to the second
            if dt2 > Duration::from_secs(t) {
                dt2 = Duration::from_secs(t + 1);
            }
            if dt2 < 2 * second {
                dt2 = 2 * second;
            }
        }
    } else {
        // round up to the hour
        let mut t = dt2.as_secs();
        if dt2 > Duration::from_secs(t) {
            t += 1;
        }
        dt2 = Duration::from_secs(t.div_ceil(3600) * 3600);
    }
    dt2
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_prefers_higher_priority() {
        let low = Alert {
            priority: 1,
            title: "low".into(),
            description: None,
            proposed_queries: Vec::new(),
        };
        let high = Alert {
            priority: 5,
            title: "high".into(),
            description: None,
            proposed_queries: Vec::new(),
        };
        assert_eq!(
            Alert::max(Some(low.clone()), Some(high.clone())).unwrap().title,
            "high"
        );
        assert_eq!(Alert::max(None, Some(low.clone())).unwrap().title, "low");
        assert!(Alert::max(None, None).is_none());
    }

    #[test]
    fn longer_has_a_two_second_floor() {
        assert_eq!(
            longer(2, Duration::from_millis(120)),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn longer_rounds_to_seconds_then_minutes() {
        assert_eq!(
            longer(2, Duration::from_millis(2600)),
            Duration::from_secs(6)
        );
        assert_eq!(longer(2, Duration::from_secs(45)), Duration::from_secs(120));
    }

    #[test]
    fn longer_rounds_hours_up() {
        assert_eq!(
            longer(2, Duration::from_secs(1800)),
            Duration::from_secs(3600)
        );
        assert_eq!(
            longer(2, Duration::from_secs(2000)),
            Duration::from_secs(7200)
        );
    }

    #[test]
    fn timeout_alert_mentions_suggested_value() {
        let alert = Alert::for_timeout(Duration::from_secs(20));
        assert!(alert.description.unwrap().contains("timeout:40s"));
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(Duration::from_secs(40)), "40s");
        assert_eq!(format_duration(Duration::from_secs(120)), "2m");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h");
    }
}
