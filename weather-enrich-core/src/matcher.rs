//! Point-in-time selection of the observation that best describes a record.

use chrono::{DateTime, DurationRound, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Observation;

/// Rule used to pick one observation for a record's timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchPolicy {
    /// First candidate, in input order, whose hour of day equals the target's
    /// hour of day in the provider's reporting offset. Neighbouring hours are
    /// never considered.
    #[default]
    NearestByHour,
    /// Smallest absolute distance to the target; earliest wins a tie.
    NearestAbsolute,
    /// Same hour bucket (truncated instant) as the target; earliest wins.
    ExactHourOnly,
}

impl MatchPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchPolicy::NearestByHour => "nearest-by-hour",
            MatchPolicy::NearestAbsolute => "nearest-absolute",
            MatchPolicy::ExactHourOnly => "exact-hour-only",
        }
    }
}

impl std::fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MatchPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "nearest-by-hour" => Ok(MatchPolicy::NearestByHour),
            "nearest-absolute" => Ok(MatchPolicy::NearestAbsolute),
            "exact-hour-only" => Ok(MatchPolicy::ExactHourOnly),
            _ => Err(anyhow::anyhow!(
                "Unknown match policy '{s}'. \
                 Supported: nearest-by-hour, nearest-absolute, exact-hour-only."
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchResult<'a> {
    Matched {
        observation: &'a Observation,
        /// Absolute distance between the record and the observation.
        offset: TimeDelta,
    },
    NoMatch,
}

impl<'a> MatchResult<'a> {
    fn of(target: DateTime<Utc>, observation: &'a Observation) -> Self {
        MatchResult::Matched {
            observation,
            offset: distance(target, observation),
        }
    }

    pub fn observation(&self) -> Option<&'a Observation> {
        match self {
            MatchResult::Matched { observation, .. } => Some(observation),
            MatchResult::NoMatch => None,
        }
    }
}

fn distance(target: DateTime<Utc>, observation: &Observation) -> TimeDelta {
    (observation.observed_at.to_utc() - target).abs()
}

fn hour_bucket(instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
    instant.duration_trunc(TimeDelta::hours(1)).ok()
}

/// Select the best candidate for `target` under `policy`.
///
/// Pure: the result depends only on the arguments. Candidates need not be
/// sorted; ties are resolved by `observed_at` (or input order for
/// [`MatchPolicy::NearestByHour`]), never by hashing or allocation order.
pub fn select(
    target: DateTime<Utc>,
    candidates: &[Observation],
    policy: MatchPolicy,
) -> MatchResult<'_> {
    let chosen = match policy {
        MatchPolicy::NearestByHour => candidates.iter().find(|obs| {
            let local_target = target.with_timezone(obs.observed_at.offset());
            obs.observed_at.hour() == local_target.hour()
        }),
        MatchPolicy::NearestAbsolute => candidates
            .iter()
            .min_by_key(|obs| (distance(target, obs), obs.observed_at)),
        MatchPolicy::ExactHourOnly => {
            let wanted = hour_bucket(target);
            candidates
                .iter()
                .filter(|obs| wanted.is_some() && hour_bucket(obs.observed_at.to_utc()) == wanted)
                .min_by_key(|obs| obs.observed_at)
        }
    };

    chosen.map_or(MatchResult::NoMatch, |obs| MatchResult::of(target, obs))
}
