//! Decides whether a snapshot proves the target was exported.

use crate::model::{MetricSnapshot, Pending, PollOutcome, VerificationTarget};

/// Match `target` against `snapshot`.
///
/// The family name and the label value must be equal, not prefixes. Series
/// are scanned in exposition order and the first one carrying
/// `label_key=label_value` is authoritative, even if a later one would pass.
/// Its value must be strictly greater than the threshold.
///
/// Never returns [`PollOutcome::FetchError`]: absence only means the
/// collector has not reported yet.
pub fn match_target(snapshot: &MetricSnapshot, target: &VerificationTarget) -> PollOutcome {
    let Some(family) = snapshot.family(&target.family) else {
        return PollOutcome::NotYetObserved(Pending::FamilyAbsent);
    };

    let Some(instance) = family
        .metrics
        .iter()
        .find(|m| m.label(&target.label_key) == Some(target.label_value.as_str()))
    else {
        let seen = family
            .metrics
            .iter()
            .filter_map(|m| m.label(&target.label_key))
            .map(str::to_owned)
            .collect();
        return PollOutcome::NotYetObserved(Pending::SeriesAbsent { seen });
    };

    if instance.value > target.threshold {
        PollOutcome::Success(instance.value)
    } else {
        PollOutcome::NotYetObserved(Pending::AtOrBelowThreshold(instance.value))
    }
}
