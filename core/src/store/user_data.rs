use super::{format_date, parse_date, DecisionStore, UserDataSource};
use crate::{
    error::{PipelineError, PipelineResult},
    model::{Account, AccountType, BalanceObservation, Transaction, UserData, UserProfile},
};
use rusqlite::{params, OptionalExtension};

impl DecisionStore {
    pub fn insert_user(&self, profile: &UserProfile) -> PipelineResult<()> {
        self.conn.lock().execute(
            "INSERT INTO users (user_id, annual_income, credit_score, history_start, held_product_types)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                profile.user_id,
                profile.annual_income,
                profile.credit_score.map(|s| s as i64),
                profile.history_start.map(format_date),
                serde_json::to_string(&profile.held_product_types)?,
            ],
        )?;
        Ok(())
    }

    pub fn insert_account(&self, user_id: &str, account: &Account) -> PipelineResult<()> {
        let account_type = match account.account_type {
            AccountType::Depository => "depository",
            AccountType::Credit     => "credit",
        };
        self.conn.lock().execute(
            "INSERT INTO accounts (
                account_id, user_id, account_type, subtype, balance_current, balance_limit,
                is_overdue, minimum_payment_amount, last_payment_amount, apr_percentage
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                account.account_id,
                user_id,
                account_type,
                account.subtype,
                account.balance_current,
                account.balance_limit,
                account.is_overdue as i64,
                account.minimum_payment_amount,
                account.last_payment_amount,
                account.apr_percentage,
            ],
        )?;
        Ok(())
    }

    pub fn insert_transactions(&self, user_id: &str, txns: &[Transaction]) -> PipelineResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for t in txns {
            tx.execute(
                "INSERT INTO transactions (
                    transaction_id, user_id, account_id, posted_date, amount,
                    category, merchant_name, payment_channel
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    t.id,
                    user_id,
                    t.account_id,
                    format_date(t.posted_date),
                    t.amount,
                    t.category,
                    t.merchant_name,
                    t.payment_channel,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn insert_balance_history(
        &self,
        user_id: &str,
        observations: &[BalanceObservation],
    ) -> PipelineResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for o in observations {
            tx.execute(
                "INSERT INTO balance_history (user_id, account_id, as_of, balance)
                 VALUES (?1, ?2, ?3, ?4)",
                params![user_id, o.account_id, format_date(o.as_of), o.balance],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Persist a whole `UserData` bundle. Used to seed fixtures.
    pub fn insert_user_data(&self, data: &UserData) -> PipelineResult<()> {
        let user_id = data.user_id();
        self.insert_user(&data.profile)?;
        for account in &data.accounts {
            self.insert_account(user_id, account)?;
        }
        self.insert_transactions(user_id, &data.transactions)?;
        if let Some(history) = &data.balance_history {
            self.insert_balance_history(user_id, history)?;
        }
        Ok(())
    }

    fn load_profile(&self, user_id: &str) -> PipelineResult<Option<UserProfile>> {
        let row = self
            .conn
            .lock()
            .query_row(
                "SELECT annual_income, credit_score, history_start, held_product_types
                 FROM users WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, Option<f64>>(0)?,
                        row.get::<_, Option<i64>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((annual_income, credit_score, history_start, held)) = row else {
            return Ok(None);
        };
        Ok(Some(UserProfile {
            user_id: user_id.to_string(),
            annual_income,
            credit_score: credit_score.map(|s| s as u32),
            history_start: history_start.as_deref().map(parse_date).transpose()?,
            held_product_types: serde_json::from_str(&held)?,
        }))
    }

    fn load_accounts(&self, user_id: &str) -> PipelineResult<Vec<Account>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT account_id, account_type, subtype, balance_current, balance_limit,
                    is_overdue, minimum_payment_amount, last_payment_amount, apr_percentage
             FROM accounts WHERE user_id = ?1 ORDER BY account_id",
        )?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                let account_type: String = row.get(1)?;
                Ok(Account {
                    account_id: row.get(0)?,
                    account_type: if account_type == "credit" {
                        AccountType::Credit
                    } else {
                        AccountType::Depository
                    },
                    subtype: row.get(2)?,
                    balance_current: row.get(3)?,
                    balance_limit: row.get(4)?,
                    is_overdue: row.get::<_, i64>(5)? != 0,
                    minimum_payment_amount: row.get(6)?,
                    last_payment_amount: row.get(7)?,
                    apr_percentage: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn load_transactions(&self, user_id: &str) -> PipelineResult<Vec<Transaction>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT transaction_id, account_id, posted_date, amount, category,
                    merchant_name, payment_channel
             FROM transactions WHERE user_id = ?1
             ORDER BY posted_date, transaction_id",
        )?;
        let raw = stmt
            .query_map(params![user_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter()
            .map(|(id, account_id, date, amount, category, merchant_name, payment_channel)| {
                Ok(Transaction {
                    id,
                    account_id,
                    posted_date: parse_date(&date)?,
                    amount,
                    category,
                    merchant_name,
                    payment_channel,
                })
            })
            .collect()
    }

    fn load_balance_history(&self, user_id: &str) -> PipelineResult<Vec<BalanceObservation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT account_id, as_of, balance FROM balance_history
             WHERE user_id = ?1 ORDER BY as_of, account_id",
        )?;
        let raw = stmt
            .query_map(params![user_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, f64>(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter()
            .map(|(account_id, as_of, balance)| {
                Ok(BalanceObservation { account_id, as_of: parse_date(&as_of)?, balance })
            })
            .collect()
    }
}

impl UserDataSource for DecisionStore {
    fn load_user(&self, user_id: &str) -> PipelineResult<UserData> {
        let profile = self
            .load_profile(user_id)?
            .ok_or_else(|| PipelineError::UserNotFound { user_id: user_id.to_string() })?;
        let accounts = self.load_accounts(user_id)?;
        let transactions = self.load_transactions(user_id)?;
        let history = self.load_balance_history(user_id)?;
        Ok(UserData {
            profile,
            transactions,
            accounts,
            // No rows means the history feed never delivered for this user.
            balance_history: if history.is_empty() { None } else { Some(history) },
        })
    }
}
