//! Behavioral matcher (spec.md §4.8): per-hour/per-day-of-week interaction
//! histograms, topic correlation, and conversion-timing alignment. The
//! weakest-signal matcher — gated behind `enableBehavioral` in the engine.

use chrono::{DateTime, Datelike, Timelike, Utc};
use std::collections::{HashMap, HashSet};

use crate::correlation::evidence::{Evidence, EvidenceData};
use crate::shared::enums::CorrelationMethod;

const MIN_WA_INTERACTIONS: usize = 3;
const QUALITY_THRESHOLD: f64 = 0.3;
const STOP_WORDS: &[&str] = &["the", "a", "an", "is", "are", "to", "and", "of", "in", "for", "it", "on", "with"];

#[derive(Debug, Clone, Default)]
pub struct InteractionHistogram {
    pub by_hour: [u32; 24],
    pub by_weekday: [u32; 7],
    pub total: u32,
}

impl InteractionHistogram {
    pub fn from_timestamps(timestamps: &[DateTime<Utc>]) -> Self {
        let mut hist = Self::default();
        for ts in timestamps {
            hist.by_hour[ts.hour() as usize] += 1;
            hist.by_weekday[ts.weekday().num_days_from_monday() as usize] += 1;
            hist.total += 1;
        }
        hist
    }

    fn peak_hour(&self) -> Option<usize> {
        self.by_hour.iter().enumerate().max_by_key(|(_, c)| **c).map(|(h, _)| h)
    }

    fn peak_weekday(&self) -> Option<usize> {
        self.by_weekday.iter().enumerate().max_by_key(|(_, c)| **c).map(|(d, _)| d)
    }

    pub fn average_per_day(&self, day_range: u32) -> f64 {
        if day_range == 0 {
            return 0.0;
        }
        self.total as f64 / day_range as f64
    }
}

/// Peak-hour overlap 0.4, peak-day overlap 0.3, frequency ratio `min/max` 0.3.
pub fn similarity(wa: &InteractionHistogram, web: &InteractionHistogram, day_range: u32) -> f64 {
    let hour_overlap = match (wa.peak_hour(), web.peak_hour()) {
        (Some(a), Some(b)) if a == b => 1.0,
        (Some(a), Some(b)) if a.abs_diff(b) <= 1 => 0.5,
        _ => 0.0,
    };
    let day_overlap = match (wa.peak_weekday(), web.peak_weekday()) {
        (Some(a), Some(b)) if a == b => 1.0,
        _ => 0.0,
    };
    let wa_avg = wa.average_per_day(day_range);
    let web_avg = web.average_per_day(day_range);
    let frequency_ratio = if wa_avg.max(web_avg) > 0.0 { wa_avg.min(web_avg) / wa_avg.max(web_avg) } else { 0.0 };

    hour_overlap * 0.4 + day_overlap * 0.3 + frequency_ratio * 0.3
}

/// `quality = similarity·0.6`, only emitted above `QUALITY_THRESHOLD`.
pub fn evidence_for(wa: &InteractionHistogram, web: &InteractionHistogram, day_range: u32) -> Option<Evidence> {
    if wa.total < MIN_WA_INTERACTIONS as u32 {
        return None;
    }
    let sim = similarity(wa, web, day_range);
    let quality = sim * 0.6;
    if quality <= QUALITY_THRESHOLD {
        return None;
    }
    Some(Evidence::new(
        CorrelationMethod::MlModel,
        true,
        quality,
        EvidenceData::Behavioral {
            peak_hour_overlap: if wa.peak_hour() == web.peak_hour() { 1.0 } else { 0.0 },
            peak_day_overlap: if wa.peak_weekday() == web.peak_weekday() { 1.0 } else { 0.0 },
            frequency_ratio: wa.average_per_day(day_range).min(web.average_per_day(day_range))
                / wa.average_per_day(day_range).max(web.average_per_day(day_range)).max(f64::MIN_POSITIVE),
        },
    ))
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Word-frequency intersection over cleaned text.
pub fn topic_correlation(a: &str, b: &str) -> f64 {
    let wa = tokenize(a);
    let wb = tokenize(b);
    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }
    let intersection = wa.intersection(&wb).count() as f64;
    let union = wa.union(&wb).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Quality `max(0, 1 - avgHoursDiff/168)·0.7` for a closed WA conversation
/// paired with a web conversion within 7 days.
pub fn conversion_alignment_quality(avg_hours_diff: f64) -> f64 {
    (1.0 - avg_hours_diff / 168.0).max(0.0) * 0.7
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn identical_peak_hour_and_day_scores_high() {
        let wa = InteractionHistogram::from_timestamps(&[ts(1, 9), ts(1, 9), ts(1, 9)]);
        let web = InteractionHistogram::from_timestamps(&[ts(8, 9), ts(8, 9)]);
        let sim = similarity(&wa, &web, 30);
        assert!(sim > 0.6, "similarity was {sim}");
    }

    #[test]
    fn fewer_than_three_wa_interactions_yields_no_evidence() {
        let wa = InteractionHistogram::from_timestamps(&[ts(1, 9), ts(1, 9)]);
        let web = InteractionHistogram::from_timestamps(&[ts(1, 9)]);
        assert!(evidence_for(&wa, &web, 30).is_none());
    }

    #[test]
    fn topic_correlation_of_identical_text_is_one() {
        assert_eq!(topic_correlation("order status please", "order status please"), 1.0);
    }

    #[test]
    fn topic_correlation_ignores_stop_words() {
        assert_eq!(topic_correlation("the order is ready", "order ready"), 1.0);
    }

    #[test]
    fn conversion_alignment_decays_with_time_gap() {
        assert!((conversion_alignment_quality(0.0) - 0.7).abs() < 1e-9);
        assert!((conversion_alignment_quality(168.0) - 0.0).abs() < 1e-9);
        assert!(conversion_alignment_quality(84.0) > 0.0 && conversion_alignment_quality(84.0) < 0.7);
    }
}
