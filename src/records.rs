//! Record listing and CRUD over the `data/<model>` routes.
//!
//! Endpoint wrappers for specific entity types live outside this crate and
//! call these conveniences with a model name such as `"shots"` or
//! `"persons"`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{build_path_with_params, Client};
use crate::Result;

/// Paging envelope returned by collection routes in paginated mode.
#[derive(Debug, Deserialize)]
struct PageEnvelope {
    data: Vec<Value>,
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_page")]
    nb_pages: u32,
}

fn default_page() -> u32 {
    1
}

impl Client {
    /// Fetch every record of `model` in one request. The server returns the
    /// whole collection as a plain JSON array when no paging is requested.
    pub async fn fetch_all(
        &self,
        model: &str,
        params: Option<&[(&str, &str)]>,
    ) -> Result<Vec<Value>> {
        let body = self.get(&format!("data/{model}"), params).await?;
        Ok(serde_json::from_value(body)?)
    }

    /// Fetch every record of `model` page by page, concatenating the pages
    /// in order.
    ///
    /// Issues one request for page 1, reads `{data, page, nb_pages}` and
    /// walks pages `2..=nb_pages` sequentially, one request per page and
    /// never in parallel.
    pub async fn fetch_all_paginated(
        &self,
        model: &str,
        params: Option<&[(&str, &str)]>,
        limit: Option<usize>,
    ) -> Result<Vec<Value>> {
        let base = format!("data/{model}");
        let mut query: Vec<(String, String)> = params
            .unwrap_or_default()
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        if let Some(limit) = limit {
            query.push(("limit".to_string(), limit.to_string()));
        }

        let first = self.fetch_page(&base, &query, 1).await?;
        let mut records = first.data;
        if first.page != first.nb_pages {
            for page in 2..=first.nb_pages {
                let envelope = self.fetch_page(&base, &query, page).await?;
                records.extend(envelope.data);
            }
        }
        Ok(records)
    }

    async fn fetch_page(
        &self,
        base: &str,
        query: &[(String, String)],
        page: u32,
    ) -> Result<PageEnvelope> {
        let mut query = query.to_vec();
        query.push(("page".to_string(), page.to_string()));
        let body = self.get(&build_path_with_params(base, &query), None).await?;
        Ok(serde_json::from_value(body)?)
    }

    /// First record of `model` matching `params`, `None` when the listing
    /// is empty.
    pub async fn fetch_first(
        &self,
        model: &str,
        params: Option<&[(&str, &str)]>,
    ) -> Result<Option<Value>> {
        let records = self.fetch_all(model, params).await?;
        Ok(records.into_iter().next())
    }

    /// Fetch one record by id.
    pub async fn fetch_one(&self, model: &str, id: &str) -> Result<Value> {
        self.get(&format!("data/{model}/{id}"), None).await
    }

    /// Create a record of `model` from `body`.
    pub async fn create<B>(&self, model: &str, body: &B) -> Result<Value>
    where
        B: Serialize + ?Sized,
    {
        self.post(&format!("data/{model}"), body).await
    }

    /// Update the record `id` of `model` with the fields in `body`.
    pub async fn update<B>(&self, model: &str, id: &str, body: &B) -> Result<Value>
    where
        B: Serialize + ?Sized,
    {
        self.put(&format!("data/{model}/{id}"), body).await
    }
}
