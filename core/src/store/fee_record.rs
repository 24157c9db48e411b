use super::{parse_decimal, parse_timestamp, FeeStore};
use crate::{
    error::FeeResult,
    lifecycle::FeeRecord,
    types::{PaymentItemId, UserId},
};
use rusqlite::{params, OptionalExtension};

impl FeeStore {
    // ── Fee records ───────────────────────────────────────────────

    pub fn insert_fee_record(&self, record: &FeeRecord) -> FeeResult<()> {
        self.conn.execute(
            "INSERT INTO fee_record (
                record_id, payment_item_id, user_id, fee_amount, original_amount, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.record_id,
                record.payment_item_id,
                record.user_id,
                record.fee_amount.to_string(),
                record.original_amount.to_string(),
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn fee_record(&self, item_id: PaymentItemId) -> FeeResult<Option<FeeRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT record_id, payment_item_id, user_id, fee_amount, original_amount, created_at
                 FROM fee_record WHERE payment_item_id = ?1",
                params![item_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((record_id, payment_item_id, user_id, fee, original, created_at)) = row else {
            return Ok(None);
        };
        Ok(Some(FeeRecord {
            record_id,
            payment_item_id,
            user_id,
            fee_amount: parse_decimal("fee_record.fee_amount", &fee)?,
            original_amount: parse_decimal("fee_record.original_amount", &original)?,
            created_at: parse_timestamp("fee_record.created_at", &created_at)?,
        }))
    }

    pub fn delete_fee_record(&self, item_id: PaymentItemId) -> FeeResult<()> {
        self.conn.execute(
            "DELETE FROM fee_record WHERE payment_item_id = ?1",
            params![item_id],
        )?;
        Ok(())
    }

    pub fn fee_record_count(&self, user_id: UserId) -> FeeResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM fee_record WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
