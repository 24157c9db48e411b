use super::{parse_decimal, FeeStore, PaymentItemRow};
use crate::{
    error::FeeResult,
    types::{PaymentItemId, UserId},
};
use rusqlite::{params, OptionalExtension};
use rust_decimal::Decimal;

impl FeeStore {
    // ── Payment items ─────────────────────────────────────────────

    pub fn insert_payment_item(
        &self,
        user_id: UserId,
        amount: Decimal,
        description: Option<&str>,
    ) -> FeeResult<PaymentItemId> {
        self.conn.execute(
            "INSERT INTO payment_item (user_id, amount, description) VALUES (?1, ?2, ?3)",
            params![user_id, amount.to_string(), description],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn payment_item(&self, item_id: PaymentItemId) -> FeeResult<Option<PaymentItemRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT item_id, user_id, amount, description
                 FROM payment_item WHERE item_id = ?1",
                params![item_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((item_id, user_id, amount, description)) => Ok(Some(PaymentItemRow {
                item_id,
                user_id,
                amount: parse_decimal("payment_item.amount", &amount)?,
                description,
            })),
            None => Ok(None),
        }
    }

    pub fn update_payment_amount(&self, item_id: PaymentItemId, amount: Decimal) -> FeeResult<()> {
        self.conn.execute(
            "UPDATE payment_item SET amount = ?1 WHERE item_id = ?2",
            params![amount.to_string(), item_id],
        )?;
        Ok(())
    }

    /// Delete a payment item; its fee record goes with it (ON DELETE CASCADE).
    /// Returns false if no such item existed.
    pub fn delete_payment_item(&self, item_id: PaymentItemId) -> FeeResult<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM payment_item WHERE item_id = ?1", params![item_id])?;
        Ok(deleted > 0)
    }

    /// Stored amounts of all of a user's payment items, optionally leaving
    /// one item out (the one being priced).
    pub fn payment_amounts(
        &self,
        user_id: UserId,
        exclude: Option<PaymentItemId>,
    ) -> FeeResult<Vec<Decimal>> {
        let mut stmt = self.conn.prepare(
            "SELECT amount FROM payment_item
             WHERE user_id = ?1 AND (?2 IS NULL OR item_id != ?2)
             ORDER BY item_id ASC",
        )?;
        let raw = stmt
            .query_map(params![user_id, exclude], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        raw.iter()
            .map(|s| parse_decimal("payment_item.amount", s))
            .collect()
    }

    pub fn payment_item_count(&self, user_id: UserId) -> FeeResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM payment_item WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
