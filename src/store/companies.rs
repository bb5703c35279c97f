use super::Store;
use crate::error::{CoreError, CoreResult};
use crate::models::Company;
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

impl Store {
    /// Creates the company on first sight; on subsequent calls, updates only
    /// fields that are newly non-empty, never overwriting an existing
    /// non-empty `symbol`/`name` with an empty one.
    pub async fn upsert_company(
        &self,
        cik: &str,
        name: &str,
        symbol: Option<&str>,
    ) -> CoreResult<Company> {
        let normalized = crate::models::normalize_cik(cik);
        if let Some(existing) = self.get_company_by_cik(&normalized).await? {
            let new_name = if existing.name.is_empty() && !name.is_empty() {
                name.to_string()
            } else {
                existing.name.clone()
            };
            let new_symbol = match (&existing.symbol, symbol) {
                (None, Some(s)) if !s.is_empty() => Some(s.to_string()),
                _ => existing.symbol.clone(),
            };

            sqlx::query("UPDATE companies SET name = ?, symbol = ? WHERE id = ?")
                .bind(&new_name)
                .bind(&new_symbol)
                .bind(existing.id.to_string())
                .execute(&self.pool)
                .await?;

            return Ok(Company {
                name: new_name,
                symbol: new_symbol,
                ..existing
            });
        }

        let company = Company::new(&normalized, name);
        sqlx::query(
            "INSERT INTO companies (id, cik, symbol, name, sic, industry, is_active, last_polled_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(company.id.to_string())
        .bind(&company.cik)
        .bind(symbol)
        .bind(&company.name)
        .bind(&company.sic)
        .bind(&company.industry)
        .bind(company.is_active)
        .bind(company.last_polled_at)
        .execute(&self.pool)
        .await?;

        Ok(Company {
            symbol: symbol.map(String::from),
            ..company
        })
    }

    pub async fn get_company_by_cik(&self, cik: &str) -> CoreResult<Option<Company>> {
        let row = sqlx::query(
            "SELECT id, cik, symbol, name, sic, industry, is_active, last_polled_at
             FROM companies WHERE cik = ?",
        )
        .bind(cik)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_company).transpose()
    }

    pub async fn get_company(&self, id: Uuid) -> CoreResult<Company> {
        let row = sqlx::query(
            "SELECT id, cik, symbol, name, sic, industry, is_active, last_polled_at
             FROM companies WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("company {id}")))?;

        row_to_company(row)
    }

    pub async fn list_active_companies(&self) -> CoreResult<Vec<Company>> {
        let rows = sqlx::query(
            "SELECT id, cik, symbol, name, sic, industry, is_active, last_polled_at
             FROM companies WHERE is_active = 1",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_company).collect()
    }

    pub async fn set_last_polled_at(&self, company_id: Uuid, when: DateTime<Utc>) -> CoreResult<()> {
        sqlx::query("UPDATE companies SET last_polled_at = ? WHERE id = ?")
            .bind(when)
            .bind(company_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_company(row: sqlx::sqlite::SqliteRow) -> CoreResult<Company> {
    let id: String = row.try_get("id")?;
    Ok(Company {
        id: Uuid::parse_str(&id).map_err(|e| CoreError::Internal(e.to_string()))?,
        cik: row.try_get("cik")?,
        symbol: row.try_get("symbol")?,
        name: row.try_get("name")?,
        sic: row.try_get("sic")?,
        industry: row.try_get("industry")?,
        is_active: row.try_get("is_active")?,
        last_polled_at: row.try_get("last_polled_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_upsert_creates_company() {
        let store = Store::in_memory().await.unwrap();
        let c = store
            .upsert_company("320193", "Apple Inc.", Some("AAPL"))
            .await
            .unwrap();
        assert_eq!(c.cik, "0000320193");
        assert_eq!(c.symbol.as_deref(), Some("AAPL"));
    }

    #[tokio::test]
    async fn second_upsert_never_blanks_existing_name() {
        let store = Store::in_memory().await.unwrap();
        store
            .upsert_company("320193", "Apple Inc.", Some("AAPL"))
            .await
            .unwrap();
        let c = store.upsert_company("320193", "", None).await.unwrap();
        assert_eq!(c.name, "Apple Inc.");
        assert_eq!(c.symbol.as_deref(), Some("AAPL"));
    }
}
