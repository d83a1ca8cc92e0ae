//! Record source replaying a captured JSON payload, for offline runs.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::source::{RecordPage, RecordSource, UpstreamError};
use crate::domain::{EntityKind, ExternalRecord, SourceSystem};

/// `{"pages": [[...], ...], "details": {"id": {...}}, "failures": {"id": 503}}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncFixture {
    #[serde(default)]
    pub pages: Vec<Vec<ExternalRecord>>,
    #[serde(default)]
    pub details: HashMap<String, ExternalRecord>,
    /// Detail fetches that fail with the given status.
    #[serde(default)]
    pub failures: HashMap<String, u16>,
}

#[derive(Debug, Clone)]
pub struct FixtureSource {
    system: SourceSystem,
    fixture: SyncFixture,
}

impl FixtureSource {
    pub fn new(system: SourceSystem, fixture: SyncFixture) -> Self {
        Self { system, fixture }
    }
}

#[async_trait]
impl RecordSource for FixtureSource {
    fn system(&self) -> SourceSystem {
        self.system
    }

    async fn list_page(
        &self,
        _kind: EntityKind,
        _token: &str,
        page_token: Option<&str>,
    ) -> Result<RecordPage, UpstreamError> {
        let index = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| UpstreamError::new(400, format!("invalid page token '{token}'")))?,
            None => 0,
        };

        let records = self.fixture.pages.get(index).cloned().unwrap_or_default();
        let next_page_token = (index + 1 < self.fixture.pages.len()).then(|| (index + 1).to_string());
        Ok(RecordPage {
            records,
            next_page_token,
        })
    }

    async fn fetch_detail(
        &self,
        _kind: EntityKind,
        _token: &str,
        external_id: &str,
    ) -> Result<ExternalRecord, UpstreamError> {
        if let Some(status) = self.fixture.failures.get(external_id) {
            return Err(UpstreamError::new(*status, "fixture failure"));
        }
        self.fixture
            .details
            .get(external_id)
            .cloned()
            .ok_or_else(|| UpstreamError::new(404, format!("no detail for {external_id}")))
    }
}
