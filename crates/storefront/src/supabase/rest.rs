//! `PostgREST` record operations.

use std::fmt::Display;

use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::instrument;

use super::{SupabaseClient, SupabaseError};

/// Filter, ordering, and projection for a `PostgREST` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    params: Vec<(String, String)>,
}

impl Query {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Columns to return (`select=...`).
    #[must_use]
    pub fn select(mut self, columns: &str) -> Self {
        self.params.push(("select".to_string(), columns.to_string()));
        self
    }

    /// `column = value`.
    #[must_use]
    pub fn eq(mut self, column: &str, value: impl Display) -> Self {
        self.params.push((column.to_string(), format!("eq.{value}")));
        self
    }

    /// `column IN (values)`.
    #[must_use]
    pub fn in_list<I, V>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Display,
    {
        self.params
            .push((column.to_string(), format!("in.{}", quote_list(values))));
        self
    }

    /// `column NOT IN (values)`.
    #[must_use]
    pub fn not_in<I, V>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Display,
    {
        self.params
            .push((column.to_string(), format!("not.in.{}", quote_list(values))));
        self
    }

    /// Sort by `column`.
    #[must_use]
    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        let direction = if ascending { "asc" } else { "desc" };
        self.params
            .push(("order".to_string(), format!("{column}.{direction}")));
        self
    }

    /// Query-string pairs.
    #[must_use]
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    fn has_filter(&self) -> bool {
        self.params
            .iter()
            .any(|(key, _)| key != "select" && key != "order")
    }
}

/// `("a","b")` with quotes and backslashes escaped.
fn quote_list<I, V>(values: I) -> String
where
    I: IntoIterator<Item = V>,
    V: Display,
{
    let quoted: Vec<String> = values
        .into_iter()
        .map(|v| {
            let escaped = v.to_string().replace('\\', "\\\\").replace('"', "\\\"");
            format!("\"{escaped}\"")
        })
        .collect();
    format!("({})", quoted.join(","))
}

impl SupabaseClient {
    /// Fetch rows from `table`.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or rows cannot be parsed.
    #[instrument(skip_all, fields(table = %table))]
    pub async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &Query,
    ) -> Result<Vec<T>, SupabaseError> {
        let url = self.endpoint(&format!("rest/v1/{table}"))?;
        let response = self
            .request(Method::GET, url)
            .query(query.params())
            .send()
            .await?;
        let response = Self::check(response).await?;

        response
            .json()
            .await
            .map_err(|e| SupabaseError::Parse(e.to_string()))
    }

    /// Insert rows into `table`.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails, including constraint violations.
    #[instrument(skip_all, fields(table = %table, rows = rows.len()))]
    pub async fn insert<T: Serialize + Sync>(
        &self,
        table: &str,
        rows: &[T],
    ) -> Result<(), SupabaseError> {
        let url = self.endpoint(&format!("rest/v1/{table}"))?;
        let response = self
            .request(Method::POST, url)
            .header("Prefer", "return=minimal")
            .json(rows)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Insert rows, updating existing rows that collide on `on_conflict`.
    ///
    /// Safe to repeat with the same payload.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails.
    #[instrument(skip_all, fields(table = %table, rows = rows.len()))]
    pub async fn upsert<T: Serialize + Sync>(
        &self,
        table: &str,
        rows: &[T],
        on_conflict: &str,
    ) -> Result<(), SupabaseError> {
        let url = self.endpoint(&format!("rest/v1/{table}"))?;
        let response = self
            .request(Method::POST, url)
            .query(&[("on_conflict", on_conflict)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(rows)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Delete rows matching `query`.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or `query` has no filter.
    #[instrument(skip_all, fields(table = %table))]
    pub async fn delete(&self, table: &str, query: &Query) -> Result<(), SupabaseError> {
        if !query.has_filter() {
            return Err(SupabaseError::Parse(
                "refusing to delete without a filter".to_string(),
            ));
        }

        let url = self.endpoint(&format!("rest/v1/{table}"))?;
        let response = self
            .request(Method::DELETE, url)
            .query(query.params())
            .header("Prefer", "return=minimal")
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_builds_postgrest_params() {
        let query = Query::new()
            .select("*")
            .eq("user_id", "u1")
            .order("created_at", true);
        assert_eq!(
            query.params(),
            &[
                ("select".to_string(), "*".to_string()),
                ("user_id".to_string(), "eq.u1".to_string()),
                ("order".to_string(), "created_at.asc".to_string()),
            ]
        );
    }

    #[test]
    fn test_not_in_quotes_values() {
        let query = Query::new().not_in("product_id", ["a", "b,c", "d\"e"]);
        assert_eq!(
            query.params()[0].1,
            r#"not.in.("a","b,c","d\"e")"#
        );
    }

    #[test]
    fn test_filter_detection() {
        assert!(!Query::new().select("*").order("id", false).has_filter());
        assert!(Query::new().eq("user_id", 1).has_filter());
        assert!(Query::new().in_list("id", [1, 2]).has_filter());
    }
}
