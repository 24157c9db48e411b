use super::{parse_decimal, parse_timestamp, FeeStore};
use crate::{
    error::{FeeError, FeeResult},
    plan::{CalibrationPoint, FeeMode, FeePlan, FeeSchedule, IntervalCalibration},
    regression::FeeCurve,
    types::UserId,
};
use rusqlite::{params, OptionalExtension};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One entry of `fee_plan.interval_data_json`, keyed by interval lower limit.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredInterval {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_fee_ratio: Option<Decimal>,
    #[serde(default)]
    points:        Vec<CalibrationPoint>,
    /// Curve fitted when the plan was saved, for the chart editor.
    #[serde(default)]
    curve:         Option<FeeCurve>,
}

type IntervalData = BTreeMap<Decimal, StoredInterval>;

struct PlanRow {
    mode:               String,
    max_fee_ratio:      String,
    formula_text:       Option<String>,
    amount_table_json:  String,
    interval_data_json: String,
    created_at:         String,
    updated_at:         String,
}

impl FeeStore {
    // ── Fee plans ─────────────────────────────────────────────────

    fn plan_row(&self, user_id: UserId) -> FeeResult<Option<PlanRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT mode, max_fee_ratio, formula_text, amount_table_json,
                        interval_data_json, created_at, updated_at
                 FROM fee_plan WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(PlanRow {
                        mode: row.get(0)?,
                        max_fee_ratio: row.get(1)?,
                        formula_text: row.get(2)?,
                        amount_table_json: row.get(3)?,
                        interval_data_json: row.get(4)?,
                        created_at: row.get(5)?,
                        updated_at: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Load a user's plan. Only the active mode's columns are read.
    pub fn fee_plan(&self, user_id: UserId) -> FeeResult<Option<FeePlan>> {
        let Some(row) = self.plan_row(user_id)? else {
            return Ok(None);
        };

        let mode = FeeMode::parse(&row.mode).ok_or_else(|| FeeError::InvalidStoredValue {
            column: "fee_plan.mode",
            value:  row.mode.clone(),
        })?;
        let schedule = match mode {
            FeeMode::Formula => FeeSchedule::Formula {
                expression: row.formula_text.unwrap_or_default(),
            },
            FeeMode::AmountTable => {
                let intervals: Vec<Decimal> = serde_json::from_str(&row.amount_table_json)?;
                let data: IntervalData = serde_json::from_str(&row.interval_data_json)?;
                // Entries holding only a fitted curve carry no calibration.
                let calibration = data
                    .into_iter()
                    .filter(|(_, s)| s.max_fee_ratio.is_some() || !s.points.is_empty())
                    .map(|(limit, s)| {
                        let entry = IntervalCalibration {
                            max_fee_ratio: s.max_fee_ratio,
                            points:        s.points,
                        };
                        (limit, entry)
                    })
                    .collect();
                FeeSchedule::AmountTable { intervals, calibration }
            }
        };

        Ok(Some(FeePlan {
            user_id,
            max_fee_ratio: parse_decimal("fee_plan.max_fee_ratio", &row.max_fee_ratio)?,
            schedule,
            created_at: parse_timestamp("fee_plan.created_at", &row.created_at)?,
            updated_at: parse_timestamp("fee_plan.updated_at", &row.updated_at)?,
        }))
    }

    /// Insert or update a plan. Only the active mode's columns are written;
    /// the other mode's stored data is left as it was. `curves` (keyed by
    /// interval lower limit) are stored beside the table-mode calibration.
    pub fn upsert_fee_plan(
        &self,
        plan: &FeePlan,
        curves: &BTreeMap<Decimal, FeeCurve>,
    ) -> FeeResult<()> {
        match &plan.schedule {
            FeeSchedule::Formula { expression } => {
                self.conn.execute(
                    "INSERT INTO fee_plan (user_id, mode, max_fee_ratio, formula_text, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(user_id) DO UPDATE SET
                        mode = excluded.mode,
                        max_fee_ratio = excluded.max_fee_ratio,
                        formula_text = excluded.formula_text,
                        updated_at = excluded.updated_at",
                    params![
                        plan.user_id,
                        FeeMode::Formula.as_str(),
                        plan.max_fee_ratio.to_string(),
                        expression,
                        plan.created_at.to_rfc3339(),
                        plan.updated_at.to_rfc3339(),
                    ],
                )?;
            }
            FeeSchedule::AmountTable { intervals, calibration } => {
                let mut data = IntervalData::new();
                for (limit, entry) in calibration {
                    let stored = data.entry(*limit).or_default();
                    stored.max_fee_ratio = entry.max_fee_ratio;
                    stored.points = entry.points.clone();
                }
                for (limit, curve) in curves {
                    data.entry(*limit).or_default().curve = Some(curve.clone());
                }
                self.conn.execute(
                    "INSERT INTO fee_plan (
                        user_id, mode, max_fee_ratio, amount_table_json, interval_data_json,
                        created_at, updated_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(user_id) DO UPDATE SET
                        mode = excluded.mode,
                        max_fee_ratio = excluded.max_fee_ratio,
                        amount_table_json = excluded.amount_table_json,
                        interval_data_json = excluded.interval_data_json,
                        updated_at = excluded.updated_at",
                    params![
                        plan.user_id,
                        FeeMode::AmountTable.as_str(),
                        plan.max_fee_ratio.to_string(),
                        serde_json::to_string(intervals)?,
                        serde_json::to_string(&data)?,
                        plan.created_at.to_rfc3339(),
                        plan.updated_at.to_rfc3339(),
                    ],
                )?;
            }
        }
        Ok(())
    }

    /// Curves persisted with the last amount-table save, keyed by
    /// interval lower limit.
    pub fn fee_plan_curves(&self, user_id: UserId) -> FeeResult<BTreeMap<Decimal, FeeCurve>> {
        let Some(row) = self.plan_row(user_id)? else {
            return Ok(BTreeMap::new());
        };
        let data: IntervalData = serde_json::from_str(&row.interval_data_json)?;
        Ok(data
            .into_iter()
            .filter_map(|(limit, s)| s.curve.map(|c| (limit, c)))
            .collect())
    }

    /// Raw formula column, whatever the active mode.
    pub fn stored_formula_text(&self, user_id: UserId) -> FeeResult<Option<String>> {
        Ok(self.plan_row(user_id)?.and_then(|row| row.formula_text))
    }
}
