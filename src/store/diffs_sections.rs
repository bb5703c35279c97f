use super::Store;
use crate::error::{CoreError, CoreResult};
use crate::models::{ChangeType, Diff, Filing, Section};
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

impl Store {
    pub async fn find_processed_filing(
        &self,
        cik: &str,
        accession_no: &str,
    ) -> CoreResult<Option<Filing>> {
        let row = sqlx::query(
            "SELECT * FROM filings WHERE cik = ? AND accession_no = ? AND is_processed = 1",
        )
        .bind(cik)
        .bind(accession_no)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_filing).transpose()
    }

    pub async fn find_filing_draft(
        &self,
        cik: &str,
        accession_no: &str,
    ) -> CoreResult<Option<Filing>> {
        let row = sqlx::query("SELECT * FROM filings WHERE cik = ? AND accession_no = ?")
            .bind(cik)
            .bind(accession_no)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_filing).transpose()
    }

    pub async fn get_filing(&self, id: Uuid) -> CoreResult<Filing> {
        let row = sqlx::query("SELECT * FROM filings WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("filing {id}")))?;
        row_to_filing(row)
    }

    /// Latest filing of the company whose form type is in `comparable_forms`,
    /// excluding `exclude_id` (the filing currently being ingested, if it
    /// already has a draft row).
    pub async fn find_latest_comparable_filing(
        &self,
        company_id: Uuid,
        comparable_forms: &[&str],
        exclude_id: Uuid,
    ) -> CoreResult<Option<Filing>> {
        if comparable_forms.is_empty() {
            return Ok(None);
        }
        let placeholders = comparable_forms
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT * FROM filings
             WHERE company_id = ? AND is_processed = 1 AND id != ?
             AND form_type IN ({placeholders})
             ORDER BY filed_date DESC LIMIT 1"
        );
        let mut q = sqlx::query(&sql)
            .bind(company_id.to_string())
            .bind(exclude_id.to_string());
        for f in comparable_forms {
            q = q.bind(*f);
        }
        let row = q.fetch_optional(&self.pool).await?;
        row.map(row_to_filing).transpose()
    }

    /// Creates or updates the (unprocessed) filing draft: body, dates, url.
    pub async fn upsert_filing_draft(&self, filing: &Filing) -> CoreResult<Filing> {
        if let Some(existing) = self.find_filing_draft(&filing.cik, &filing.accession_no).await? {
            sqlx::query(
                "UPDATE filings SET form_type = ?, filed_date = ?, report_date = ?, url = ?, raw_content = ?
                 WHERE id = ?",
            )
            .bind(&filing.form_type)
            .bind(filing.filed_date)
            .bind(filing.report_date)
            .bind(&filing.url)
            .bind(&filing.raw_content)
            .bind(existing.id.to_string())
            .execute(&self.pool)
            .await?;
            return self.get_filing(existing.id).await;
        }

        sqlx::query(
            "INSERT INTO filings
             (id, company_id, cik, accession_no, form_type, filed_date, report_date, url,
              raw_content, summary, key_highlights, material_changes, risk_factor_changes,
              business_changes, is_processed)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, 0, 0)",
        )
        .bind(filing.id.to_string())
        .bind(filing.company_id.to_string())
        .bind(&filing.cik)
        .bind(&filing.accession_no)
        .bind(&filing.form_type)
        .bind(filing.filed_date)
        .bind(filing.report_date)
        .bind(&filing.url)
        .bind(&filing.raw_content)
        .bind(&filing.summary)
        .bind(serde_json::to_string(&filing.key_highlights)?)
        .execute(&self.pool)
        .await?;

        self.get_filing(filing.id).await
    }

    /// Step 7 of the Ingestion Workflow: persist sections, diffs, and the
    /// filing's processed counters in one transaction. Re-derives sections
    /// on reprocess (delete-then-insert).
    pub async fn persist_ingestion_result(
        &self,
        filing_id: Uuid,
        sections: &[Section],
        diffs: &[Diff],
    ) -> CoreResult<()> {
        let material_changes = diffs.iter().filter(|d| d.is_material()).count() as i64;
        let risk_factor_changes = diffs
            .iter()
            .filter(|d| d.section.to_lowercase().contains("risk"))
            .count() as i64;
        let business_changes = diffs
            .iter()
            .filter(|d| d.section.to_lowercase().contains("business"))
            .count() as i64;

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM sections WHERE filing_id = ?")
            .bind(filing_id.to_string())
            .execute(&mut *tx)
            .await?;

        for section in sections {
            sqlx::query(
                "INSERT INTO sections
                 (filing_id, section_type, name, \"order\", line_start, line_end, content)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(section.filing_id.to_string())
            .bind(&section.section_type)
            .bind(&section.name)
            .bind(section.order)
            .bind(section.line_start)
            .bind(section.line_end)
            .bind(&section.content)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM diffs WHERE filing_id = ?")
            .bind(filing_id.to_string())
            .execute(&mut *tx)
            .await?;

        for diff in diffs {
            sqlx::query(
                "INSERT INTO diffs
                 (id, filing_id, previous_filing_id, section, change_type, summary, impact,
                  materiality_score, before_text, after_text, line_number)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(diff.id.to_string())
            .bind(diff.filing_id.to_string())
            .bind(diff.previous_filing_id.to_string())
            .bind(&diff.section)
            .bind(diff.change_type.to_string())
            .bind(&diff.summary)
            .bind(&diff.impact)
            .bind(diff.materiality_score)
            .bind(&diff.before_text)
            .bind(&diff.after_text)
            .bind(diff.line_number)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "UPDATE filings SET is_processed = 1, material_changes = ?, risk_factor_changes = ?,
             business_changes = ? WHERE id = ?",
        )
        .bind(material_changes)
        .bind(risk_factor_changes)
        .bind(business_changes)
        .bind(filing_id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn material_diffs_for_filing(&self, filing_id: Uuid) -> CoreResult<Vec<Diff>> {
        let rows = sqlx::query(
            "SELECT * FROM diffs WHERE filing_id = ? AND materiality_score >= 0.7
             ORDER BY materiality_score DESC",
        )
        .bind(filing_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_diff).collect()
    }
}

fn parse_uuid(s: &str) -> CoreResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| CoreError::Internal(e.to_string()))
}

fn row_to_filing(row: sqlx::sqlite::SqliteRow) -> CoreResult<Filing> {
    let id: String = row.try_get("id")?;
    let company_id: String = row.try_get("company_id")?;
    let highlights: String = row.try_get("key_highlights")?;
    Ok(Filing {
        id: parse_uuid(&id)?,
        company_id: parse_uuid(&company_id)?,
        cik: row.try_get("cik")?,
        accession_no: row.try_get("accession_no")?,
        form_type: row.try_get("form_type")?,
        filed_date: row.try_get::<DateTime<Utc>, _>("filed_date")?,
        report_date: row.try_get("report_date")?,
        url: row.try_get("url")?,
        raw_content: row.try_get("raw_content")?,
        summary: row.try_get("summary")?,
        key_highlights: serde_json::from_str(&highlights).unwrap_or_default(),
        material_changes: row.try_get::<i64, _>("material_changes")? as u32,
        risk_factor_changes: row.try_get::<i64, _>("risk_factor_changes")? as u32,
        business_changes: row.try_get::<i64, _>("business_changes")? as u32,
        is_processed: row.try_get("is_processed")?,
    })
}

fn row_to_diff(row: sqlx::sqlite::SqliteRow) -> CoreResult<Diff> {
    let id: String = row.try_get("id")?;
    let filing_id: String = row.try_get("filing_id")?;
    let previous_filing_id: String = row.try_get("previous_filing_id")?;
    let change_type: String = row.try_get("change_type")?;
    Ok(Diff {
        id: parse_uuid(&id)?,
        filing_id: parse_uuid(&filing_id)?,
        previous_filing_id: parse_uuid(&previous_filing_id)?,
        section: row.try_get("section")?,
        change_type: parse_change_type(&change_type),
        summary: row.try_get("summary")?,
        impact: row.try_get("impact")?,
        materiality_score: row.try_get("materiality_score")?,
        before_text: row.try_get("before_text")?,
        after_text: row.try_get("after_text")?,
        line_number: row.try_get("line_number")?,
    })
}

fn parse_change_type(s: &str) -> ChangeType {
    match s {
        "ADDITION" => ChangeType::Addition,
        "DELETION" => ChangeType::Deletion,
        "MODIFICATION" => ChangeType::Modification,
        _ => ChangeType::Unchanged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Company;

    #[tokio::test]
    async fn draft_then_persist_marks_processed() {
        let store = Store::in_memory().await.unwrap();
        let company = store.upsert_company("320193", "Apple Inc.", None).await.unwrap();
        let filing = Filing::new(
            company.id,
            "320193",
            "0000320193-23-000064",
            "10-K",
            Utc::now(),
            "https://example.test",
            "ITEM 1. BUSINESS\nWe sell phones.",
        );
        let draft = store.upsert_filing_draft(&filing).await.unwrap();
        assert!(!draft.is_processed);

        store
            .persist_ingestion_result(draft.id, &[], &[])
            .await
            .unwrap();

        let processed = store.get_filing(draft.id).await.unwrap();
        assert!(processed.is_processed);
        assert_eq!(processed.material_changes, 0);
    }

    #[tokio::test]
    async fn comparable_lookup_excludes_self_and_unprocessed() {
        let store = Store::in_memory().await.unwrap();
        let company = Company::new("320193", "Apple Inc.");
        // Seed directly: no repo method for raw insert-without-upsert-semantics test helper,
        // so go through the public upsert/draft/persist path instead.
        let company = store
            .upsert_company(&company.cik, &company.name, None)
            .await
            .unwrap();

        let prior = Filing::new(
            company.id,
            "320193",
            "0000320193-22-000050",
            "10-K",
            Utc::now() - chrono::Duration::days(365),
            "https://example.test/prior",
            "ITEM 1. BUSINESS\nOld text.",
        );
        let prior = store.upsert_filing_draft(&prior).await.unwrap();
        store.persist_ingestion_result(prior.id, &[], &[]).await.unwrap();

        let current = Filing::new(
            company.id,
            "320193",
            "0000320193-23-000064",
            "10-K",
            Utc::now(),
            "https://example.test/current",
            "ITEM 1. BUSINESS\nNew text.",
        );
        let current = store.upsert_filing_draft(&current).await.unwrap();

        let found = store
            .find_latest_comparable_filing(company.id, &["10-K"], current.id)
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, prior.id);
    }
}
