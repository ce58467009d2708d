//! Attribution models (spec.md §4.11): credit allocation across touchpoints
//! leading to a conversion at time `T`.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct AttributedTouchpoint {
    pub label: String,
    pub occurred_at: DateTime<Utc>,
    pub credit: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributionModel {
    LastTouch,
    FirstTouch,
    Linear,
    TimeDecay,
    PositionBased,
}

const TIME_DECAY_HALF_LIFE_DAYS: f64 = 7.0;

pub fn attribute(
    touchpoints: &[(String, DateTime<Utc>)],
    conversion_at: DateTime<Utc>,
    model: AttributionModel,
) -> Vec<AttributedTouchpoint> {
    let eligible: Vec<&(String, DateTime<Utc>)> = touchpoints.iter().filter(|(_, ts)| *ts <= conversion_at).collect();
    if eligible.is_empty() {
        return vec![];
    }

    match model {
        AttributionModel::LastTouch => {
            let (label, ts) = eligible.last().unwrap().clone();
            vec![AttributedTouchpoint { label: label.clone(), occurred_at: *ts, credit: 1.0 }]
        }
        AttributionModel::FirstTouch => {
            let (label, ts) = eligible.first().unwrap().clone();
            vec![AttributedTouchpoint { label: label.clone(), occurred_at: *ts, credit: 1.0 }]
        }
        AttributionModel::Linear => {
            let share = 1.0 / eligible.len() as f64;
            eligible
                .iter()
                .map(|(label, ts)| AttributedTouchpoint { label: label.clone(), occurred_at: *ts, credit: share })
                .collect()
        }
        AttributionModel::TimeDecay => {
            let raw: Vec<f64> = eligible
                .iter()
                .map(|(_, ts)| {
                    let days_before = (conversion_at - *ts).num_seconds() as f64 / 86_400.0;
                    (-std::f64::consts::LN_2 * days_before / TIME_DECAY_HALF_LIFE_DAYS).exp()
                })
                .collect();
            let total: f64 = raw.iter().sum();
            eligible
                .iter()
                .zip(raw.iter())
                .map(|((label, ts), w)| AttributedTouchpoint { label: label.clone(), occurred_at: *ts, credit: w / total })
                .collect()
        }
        AttributionModel::PositionBased => position_based(&eligible),
    }
}

/// 40% first, 40% last, 20% spread across the middle. 1 touchpoint -> 100%;
/// 2 touchpoints -> 50/50.
fn position_based(eligible: &[&(String, DateTime<Utc>)]) -> Vec<AttributedTouchpoint> {
    let n = eligible.len();
    if n == 1 {
        let (label, ts) = eligible[0];
        return vec![AttributedTouchpoint { label: label.clone(), occurred_at: *ts, credit: 1.0 }];
    }
    if n == 2 {
        return eligible
            .iter()
            .map(|(label, ts)| AttributedTouchpoint { label: label.clone(), occurred_at: *ts, credit: 0.5 })
            .collect();
    }

    let middle_count = n - 2;
    let middle_share = 0.20 / middle_count as f64;
    eligible
        .iter()
        .enumerate()
        .map(|(i, (label, ts))| {
            let credit = if i == 0 {
                0.40
            } else if i == n - 1 {
                0.40
            } else {
                middle_share
            };
            AttributedTouchpoint { label: label.clone(), occurred_at: *ts, credit }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn touchpoints(conversion_at: DateTime<Utc>) -> Vec<(String, DateTime<Utc>)> {
        vec![
            ("web".to_string(), conversion_at - Duration::days(6)),
            ("email".to_string(), conversion_at - Duration::days(3)),
            ("whatsapp".to_string(), conversion_at - Duration::days(1)),
        ]
    }

    // spec.md §8 scenario 6: linear credits 1/3 each; time-decay raw weights
    // ~0.5503, 0.7437, 0.9036 normalized to ~0.251, 0.339, 0.412.
    #[test]
    fn scenario_six_linear_splits_evenly() {
        let conversion_at = Utc::now();
        let result = attribute(&touchpoints(conversion_at), conversion_at, AttributionModel::Linear);
        assert_eq!(result.len(), 3);
        for tp in &result {
            assert!((tp.credit - 1.0 / 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn scenario_six_time_decay_weights_recent_touchpoints_higher() {
        let conversion_at = Utc::now();
        let result = attribute(&touchpoints(conversion_at), conversion_at, AttributionModel::TimeDecay);
        assert!((result[0].credit - 0.251).abs() < 0.01, "web credit was {}", result[0].credit);
        assert!((result[1].credit - 0.339).abs() < 0.01, "email credit was {}", result[1].credit);
        assert!((result[2].credit - 0.412).abs() < 0.01, "whatsapp credit was {}", result[2].credit);
    }

    #[test]
    fn last_touch_credits_only_final_touchpoint() {
        let conversion_at = Utc::now();
        let result = attribute(&touchpoints(conversion_at), conversion_at, AttributionModel::LastTouch);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].label, "whatsapp");
        assert_eq!(result[0].credit, 1.0);
    }

    #[test]
    fn position_based_single_touchpoint_gets_full_credit() {
        let conversion_at = Utc::now();
        let single = vec![("web".to_string(), conversion_at - Duration::days(1))];
        let result = attribute(&single, conversion_at, AttributionModel::PositionBased);
        assert_eq!(result[0].credit, 1.0);
    }

    #[test]
    fn position_based_two_touchpoints_split_evenly() {
        let conversion_at = Utc::now();
        let pair = vec![
            ("web".to_string(), conversion_at - Duration::days(2)),
            ("email".to_string(), conversion_at - Duration::days(1)),
        ];
        let result = attribute(&pair, conversion_at, AttributionModel::PositionBased);
        assert_eq!(result[0].credit, 0.5);
        assert_eq!(result[1].credit, 0.5);
    }

    #[test]
    fn position_based_three_touchpoints_weights_ends_higher() {
        let conversion_at = Utc::now();
        let result = attribute(&touchpoints(conversion_at), conversion_at, AttributionModel::PositionBased);
        assert_eq!(result[0].credit, 0.40);
        assert_eq!(result[2].credit, 0.40);
        assert_eq!(result[1].credit, 0.20);
    }

    #[test]
    fn touchpoints_after_conversion_are_excluded() {
        let conversion_at = Utc::now();
        let mut tps = touchpoints(conversion_at);
        tps.push(("late".to_string(), conversion_at + Duration::days(1)));
        let result = attribute(&tps, conversion_at, AttributionModel::Linear);
        assert_eq!(result.len(), 3);
    }
}
