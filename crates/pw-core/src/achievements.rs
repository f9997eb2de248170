//! Achievement award rules.

use tracing::debug;

use crate::record::{Achievement, Criteria, ProgressStatus, UserProgress};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rule {
    LessonsCompleted(u32),
    TotalPoints(u32),
}

impl Rule {
    /// `None` for criteria this build does not know how to evaluate.
    pub fn from_criteria(criteria: &Criteria) -> Option<Self> {
        match criteria.kind.as_str() {
            "lessons_completed" => Some(Rule::LessonsCompleted(criteria.required_value)),
            "total_points" => Some(Rule::TotalPoints(criteria.required_value)),
            _ => None,
        }
    }

    pub fn is_met(self, stats: &ProgressStats) -> bool {
        match self {
            Rule::LessonsCompleted(n) => stats.lessons_completed >= n,
            Rule::TotalPoints(n) => stats.total_points >= n,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProgressStats {
    pub lessons_completed: u32,
    pub total_points: u32,
}

impl ProgressStats {
    pub fn from_progress(progress: &[UserProgress]) -> Self {
        progress.iter().fold(Self::default(), |mut acc, row| {
            if row.status == ProgressStatus::Completed {
                acc.lessons_completed += 1;
            }
            acc.total_points = acc.total_points.saturating_add(row.score);
            acc
        })
    }
}

/// Achievements the user has now qualified for but not yet been awarded.
pub fn eligible_awards<'a>(
    progress: &[UserProgress],
    achievements: &'a [Achievement],
) -> Vec<&'a Achievement> {
    let stats = ProgressStats::from_progress(progress);
    achievements
        .iter()
        .filter(|a| !a.is_earned())
        .filter(|a| match Rule::from_criteria(&a.criteria) {
            Some(rule) => rule.is_met(&stats),
            None => {
                debug!(achievement = %a.id, kind = %a.criteria.kind, "unknown criteria");
                false
            }
        })
        .collect()
}
