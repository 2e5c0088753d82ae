use serde::{Deserialize, Serialize};
use chrono::{DateTime, NaiveDateTime, Utc};

use super::lenient;

/// Scored analysis of one completed call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct LeadAnalytics {
    pub id: i64,
    #[serde(rename = "callId")]
    pub call_id: i64,
    #[serde(rename = "userId")]
    pub user_id: i64,
    #[serde(rename = "contactId")]
    pub contact_id: Option<i64>,
    #[serde(rename = "intentLevel")]
    pub intent_level: Option<String>,
    #[serde(rename = "intentScore")]
    pub intent_score: Option<i32>,
    #[serde(rename = "urgencyLevel")]
    pub urgency_level: Option<String>,
    #[serde(rename = "urgencyScore")]
    pub urgency_score: Option<i32>,
    #[serde(rename = "budgetConstraint")]
    pub budget_constraint: Option<String>,
    #[serde(rename = "budgetScore")]
    pub budget_score: Option<i32>,
    #[serde(rename = "fitAlignment")]
    pub fit_alignment: Option<String>,
    #[serde(rename = "fitScore")]
    pub fit_score: Option<i32>,
    #[serde(rename = "engagementHealth")]
    pub engagement_health: Option<String>,
    #[serde(rename = "engagementScore")]
    pub engagement_score: Option<i32>,
    #[serde(rename = "totalScore")]
    pub total_score: Option<i32>,
    #[serde(rename = "leadStatusTag")]
    pub lead_status_tag: Option<String>,
    #[serde(rename = "extractedName")]
    pub extracted_name: Option<String>,
    #[serde(rename = "extractedEmail")]
    pub extracted_email: Option<String>,
    #[serde(rename = "companyName")]
    pub company_name: Option<String>,
    #[serde(rename = "demoBookDatetime")]
    pub demo_book_datetime: Option<DateTime<Utc>>,
    #[serde(rename = "ctaPricingClicked")]
    pub cta_pricing_clicked: bool,
    #[serde(rename = "ctaDemoClicked")]
    pub cta_demo_clicked: bool,
    #[serde(rename = "ctaFollowupClicked")]
    pub cta_followup_clicked: bool,
    #[serde(rename = "ctaEscalatedToHuman")]
    pub cta_escalated_to_human: bool,
    #[serde(rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LeadTemperature {
    Hot,
    Warm,
    Cold,
}

impl LeadTemperature {
    pub fn from_score(score: i32) -> Self {
        if score >= 80 {
            LeadTemperature::Hot
        } else if score >= 50 {
            LeadTemperature::Warm
        } else {
            LeadTemperature::Cold
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "hot" => Some(LeadTemperature::Hot),
            "warm" => Some(LeadTemperature::Warm),
            "cold" => Some(LeadTemperature::Cold),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            LeadTemperature::Hot => "Hot",
            LeadTemperature::Warm => "Warm",
            LeadTemperature::Cold => "Cold",
        }
    }
}

impl LeadAnalytics {
    /// The model's own tag wins; otherwise derive one from the total score.
    pub fn status_tag(&self) -> Option<LeadTemperature> {
        self.lead_status_tag
            .as_deref()
            .and_then(LeadTemperature::parse)
            .or_else(|| self.total_score.map(LeadTemperature::from_score))
    }

    pub fn score_display(&self) -> String {
        score_display(self.total_score)
    }

    pub fn to_view(&self) -> LeadAnalyticsView {
        LeadAnalyticsView {
            call_id: self.call_id,
            contact_id: self.contact_id,
            name: self.extracted_name.clone(),
            company: self.company_name.clone(),
            status: self.status_tag().map(|t| t.display_name().to_string()),
            score: self.score_display(),
            intent: level_display(self.intent_level.as_deref(), self.intent_score),
            urgency: level_display(self.urgency_level.as_deref(), self.urgency_score),
            budget: level_display(self.budget_constraint.as_deref(), self.budget_score),
            fit: level_display(self.fit_alignment.as_deref(), self.fit_score),
            engagement: level_display(self.engagement_health.as_deref(), self.engagement_score),
            demo_booked_for: self.demo_book_datetime,
        }
    }
}

pub fn score_display(score: Option<i32>) -> String {
    match score {
        Some(score) => format!("{}/100", score.clamp(0, 100)),
        None => "N/A".to_string(),
    }
}

/// Title-cased level with its score, e.g. `"High (3)"`.
pub fn level_display(level: Option<&str>, score: Option<i32>) -> String {
    let level = level.map(str::trim).filter(|l| !l.is_empty());
    match (level, score) {
        (Some(level), Some(score)) => format!("{} ({})", title_case(level), score),
        (Some(level), None) => title_case(level),
        (None, Some(score)) => score.to_string(),
        (None, None) => "-".to_string(),
    }
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Row shape the dashboard renders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadAnalyticsView {
    #[serde(rename = "callId")]
    pub call_id: i64,
    #[serde(rename = "contactId")]
    pub contact_id: Option<i64>,
    pub name: Option<String>,
    pub company: Option<String>,
    pub status: Option<String>,
    pub score: String,
    pub intent: String,
    pub urgency: String,
    pub budget: String,
    pub fit: String,
    pub engagement: String,
    #[serde(rename = "demoBookedFor")]
    pub demo_booked_for: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LeadAnalyticsSummary {
    pub total: usize,
    pub hot: usize,
    pub warm: usize,
    pub cold: usize,
    #[serde(rename = "averageScore")]
    pub average_score: Option<f64>,
    #[serde(rename = "demosBooked")]
    pub demos_booked: usize,
}

impl LeadAnalyticsSummary {
    pub fn from_rows(rows: &[LeadAnalytics]) -> Self {
        let mut summary = LeadAnalyticsSummary {
            total: rows.len(),
            ..Default::default()
        };

        let mut score_sum = 0i64;
        let mut scored = 0i64;
        for row in rows {
            match row.status_tag() {
                Some(LeadTemperature::Hot) => summary.hot += 1,
                Some(LeadTemperature::Warm) => summary.warm += 1,
                Some(LeadTemperature::Cold) => summary.cold += 1,
                None => {}
            }
            if let Some(score) = row.total_score {
                score_sum += score as i64;
                scored += 1;
            }
            if row.demo_book_datetime.is_some() {
                summary.demos_booked += 1;
            }
        }

        if scored > 0 {
            let avg = score_sum as f64 / scored as f64;
            summary.average_score = Some((avg * 10.0).round() / 10.0);
        }
        summary
    }
}

/// Structured output of the extraction prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadExtraction {
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub intent_level: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_i32")]
    pub intent_score: Option<i32>,
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub urgency_level: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_i32")]
    pub urgency_score: Option<i32>,
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub budget_constraint: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_i32")]
    pub budget_score: Option<i32>,
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub fit_alignment: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_i32")]
    pub fit_score: Option<i32>,
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub engagement_health: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_i32")]
    pub engagement_score: Option<i32>,
    #[serde(default, deserialize_with = "lenient::optional_i32")]
    pub total_score: Option<i32>,
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub lead_status_tag: Option<String>,
    #[serde(default)]
    pub reasoning: Option<serde_json::Value>,
    #[serde(default)]
    pub extraction: ContactDetails,
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub demo_book_datetime: Option<String>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub cta_pricing_clicked: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub cta_demo_clicked: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub cta_followup_clicked: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub cta_escalated_to_human: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactDetails {
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub name: Option<String>,
    #[serde(default, alias = "email", deserialize_with = "lenient::optional_text")]
    pub email_address: Option<String>,
    #[serde(default, alias = "company", deserialize_with = "lenient::optional_text")]
    pub company_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub requirements: Option<String>,
}

impl LeadExtraction {
    /// Demo time the caller agreed to. Offsets are honoured; naive times are UTC.
    pub fn demo_time(&self) -> Option<DateTime<Utc>> {
        let raw = self.demo_book_datetime.as_deref()?.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| naive.and_utc())
    }

    pub fn email(&self) -> Option<&str> {
        self.extraction
            .email_address
            .as_deref()
            .filter(|e| e.contains('@'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(score: Option<i32>, tag: Option<&str>) -> LeadAnalytics {
        LeadAnalytics {
            id: 1,
            call_id: 1,
            user_id: 1,
            contact_id: None,
            intent_level: Some("high".to_string()),
            intent_score: Some(3),
            urgency_level: None,
            urgency_score: None,
            budget_constraint: None,
            budget_score: None,
            fit_alignment: None,
            fit_score: None,
            engagement_health: None,
            engagement_score: None,
            total_score: score,
            lead_status_tag: tag.map(str::to_string),
            extracted_name: None,
            extracted_email: None,
            company_name: None,
            demo_book_datetime: None,
            cta_pricing_clicked: false,
            cta_demo_clicked: false,
            cta_followup_clicked: false,
            cta_escalated_to_human: false,
            created_at: None,
        }
    }

    #[test]
    fn test_status_tag_from_score() {
        assert_eq!(row(Some(85), None).status_tag(), Some(LeadTemperature::Hot));
        assert_eq!(row(Some(50), None).status_tag(), Some(LeadTemperature::Warm));
        assert_eq!(row(Some(12), None).status_tag(), Some(LeadTemperature::Cold));
        assert_eq!(row(None, None).status_tag(), None);
    }

    #[test]
    fn test_model_tag_overrides_score() {
        assert_eq!(row(Some(20), Some("hot")).status_tag(), Some(LeadTemperature::Hot));
        assert_eq!(row(Some(90), Some("maybe")).status_tag(), Some(LeadTemperature::Hot));
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(score_display(Some(85)), "85/100");
        assert_eq!(score_display(Some(130)), "100/100");
        assert_eq!(score_display(None), "N/A");
        assert_eq!(level_display(Some("very high"), Some(3)), "Very High (3)");
        assert_eq!(level_display(Some("LOW"), None), "Low");
        assert_eq!(level_display(None, None), "-");
        assert_eq!(row(Some(85), None).to_view().intent, "High (3)");
    }

    #[test]
    fn test_summary_counts_and_average() {
        let rows = vec![row(Some(90), None), row(Some(60), None), row(Some(15), None), row(None, None)];
        let summary = LeadAnalyticsSummary::from_rows(&rows);
        assert_eq!(summary.total, 4);
        assert_eq!((summary.hot, summary.warm, summary.cold), (1, 1, 1));
        assert_eq!(summary.average_score, Some(55.0));
    }

    #[test]
    fn test_extraction_parses_loose_llm_output() {
        let json = r#"{
            "intent_level": "High", "intent_score": "3",
            "total_score": 82, "lead_status_tag": "Hot",
            "extraction": {"name": "Asha", "email_address": "asha@example.com", "company_name": "N/A"},
            "demo_book_datetime": "2025-03-04 15:30",
            "cta_demo_clicked": "Yes"
        }"#;
        let extraction: LeadExtraction = serde_json::from_str(json).unwrap();
        assert_eq!(extraction.intent_score, Some(3));
        assert_eq!(extraction.email(), Some("asha@example.com"));
        assert_eq!(extraction.extraction.company_name, None);
        assert!(extraction.cta_demo_clicked);
        let demo = extraction.demo_time().unwrap();
        assert_eq!(demo.to_rfc3339(), "2025-03-04T15:30:00+00:00");
    }

    #[test]
    fn test_demo_time_with_offset() {
        let extraction = LeadExtraction {
            demo_book_datetime: Some("2025-03-04T15:30:00+05:30".to_string()),
            ..Default::default()
        };
        assert_eq!(extraction.demo_time().unwrap().to_rfc3339(), "2025-03-04T10:00:00+00:00");
    }
}
