use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Identity of the training day a session belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DayContext {
    pub user_id: String,
    pub plan_id: String,
    pub day_id: String,
    pub date: NaiveDate,
    /// Set when this is the plan's last scheduled training day.
    pub is_final_day: bool,
}

impl DayContext {
    pub fn targets(&self, plan_id: &str, day_id: &str) -> bool {
        self.plan_id == plan_id && self.day_id == day_id
    }

    pub fn matches(&self, plan_id: &str, day_id: &str, date: NaiveDate) -> bool {
        self.targets(plan_id, day_id) && self.date == date
    }
}
