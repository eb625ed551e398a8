//! The aggregation-safe list executor.
//!
//! Without joins the page and the total are two independent statements. With
//! joins, fan-out would multiply root rows, so the total becomes
//! `COUNT(DISTINCT self.<pk>)` and the page is grouped by the root key with
//! every child column aggregated, which leaves exactly one row per root
//! entity for `LIMIT`/`OFFSET` to act on.

use quarry_shared::QueryMetrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use crate::aggregate::{AlignmentPolicy, ChildRowCodec, GroupConcatCodec, DEFAULT_SEPARATOR};
use crate::definition::ListDefinition;
use crate::error::{QueryError, Result};
use crate::filter::{parse_filters, CanonicalFilters};
use crate::join::{JoinPlan, ROOT_ALIAS};
use crate::pagination::{Pagination, PaginationConfig};
use crate::params::QueryParams;
use crate::predicate::build_predicates;
use crate::reshape::Reshaper;
use crate::response::{ListPage, ListResponse, PageInfo};
use crate::sort::{Sort, SortOrder};
use crate::sql::{Query, QueryExt, Selector, Statement};
use crate::store::QueryStore;

/// Engine-wide query settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub default_page: u64,
    pub default_limit: u64,
    pub max_limit: u64,
    /// Separator between aggregated child values.
    pub separator: String,
    pub alignment: AlignmentPolicy,
}

impl Default for QueryConfig {
    fn default() -> Self {
        let pagination = PaginationConfig::default();
        Self {
            default_page: pagination.default_page,
            default_limit: pagination.default_limit,
            max_limit: pagination.max_limit,
            separator: DEFAULT_SEPARATOR.to_string(),
            alignment: AlignmentPolicy::default(),
        }
    }
}

impl QueryConfig {
    pub fn pagination(&self) -> PaginationConfig {
        PaginationConfig {
            default_page: self.default_page,
            default_limit: self.default_limit,
            max_limit: self.max_limit,
        }
    }
}

/// The two statements of one list call.
#[derive(Debug, Clone, PartialEq)]
pub struct ListStatements {
    pub data: Statement,
    pub count: Statement,
}

pub struct QueryEngine {
    store: Arc<dyn QueryStore>,
    codec: Arc<dyn ChildRowCodec>,
    config: QueryConfig,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn QueryStore>, config: QueryConfig) -> Self {
        let codec = Arc::new(GroupConcatCodec::new(config.separator.clone()));
        Self {
            store,
            codec,
            config,
        }
    }

    /// Replaces the child-row codec (and with it the aggregation protocol).
    pub fn with_codec(mut self, codec: Arc<dyn ChildRowCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Runs one list query and wraps the page in the response envelope.
    #[instrument(skip_all, fields(list = %list.table))]
    pub async fn list(&self, list: &ListDefinition, params: &QueryParams) -> Result<ListResponse> {
        let started = Instant::now();
        let result = self.run(list, params).await;
        QueryMetrics::query_completed(&list.table, started.elapsed(), result.is_ok());
        result
    }

    async fn run(&self, list: &ListDefinition, params: &QueryParams) -> Result<ListResponse> {
        let plan = self.plan(list).await?;

        let (filters, report) = parse_filters(params, &list.filters);
        if !report.is_clean() {
            debug!(ignored = ?report.ignored, "request filters ignored");
            QueryMetrics::filters_ignored(&list.table, report.ignored.len());
        }
        let pagination = Pagination::from_params(params, &self.config.pagination());
        let sort = Sort::from_params(params, &list.sort);

        let statements = self.statements(list, &plan, &filters, &pagination, &sort)?;
        debug!(data = %statements.data.sql, count = %statements.count.sql, "assembled list query");

        let (total, rows) = tokio::try_join!(
            self.store.fetch_count(&statements.count),
            self.store.fetch_rows(&statements.data),
        )?;

        let items = Reshaper::new(&plan, self.codec.as_ref(), self.config.alignment).reshape_all(&rows)?;
        QueryMetrics::rows_matched(&list.table, total);
        info!(total, returned = items.len(), page = pagination.page, "list query completed");

        Ok(ListResponse::success(ListPage {
            items,
            pagination: PageInfo::new(&pagination, total),
        }))
    }

    /// Validates the joins and discovers the columns of projecting joins that
    /// did not list them. Validation happens before the store is touched.
    pub async fn plan(&self, list: &ListDefinition) -> Result<JoinPlan> {
        let mut plan = JoinPlan::new(&list.joins, &list.primary_key)?;
        let pending: Vec<(String, String)> = plan
            .undiscovered()
            .map(|j| (j.alias.to_string(), j.table.to_string()))
            .collect();
        for (alias, table) in pending {
            let columns = self.store.table_columns(&table).await?;
            plan.set_columns(&alias, columns)?;
        }
        Ok(plan)
    }

    /// Builds the count and page statements for a resolved request.
    pub fn statements(
        &self,
        list: &ListDefinition,
        plan: &JoinPlan,
        filters: &CanonicalFilters,
        pagination: &Pagination,
        sort: &Sort,
    ) -> Result<ListStatements> {
        let pk = format!("{ROOT_ALIAS}.{}", list.primary_key);

        let root = match &list.columns {
            Some(cols) => cols
                .iter()
                .map(|c| Selector::new(c).set_source(ROOT_ALIAS))
                .collect(),
            None => vec![Selector::new("*").set_source(ROOT_ALIAS)],
        };
        let mut query = Query::new(&list.table, ROOT_ALIAS).with_selectors(root);
        if !plan.is_empty() {
            query = plan.attach(&query, &self.codec)?;
        }
        for predicate in build_predicates(filters, plan) {
            query = query.and_where(predicate);
        }

        let count = query
            .count_sql((!plan.is_empty()).then_some(pk.as_str()))
            .map_err(QueryError::configuration)?;

        if !plan.is_empty() {
            query = query.group_by(&pk);
        }
        query = query.order_by(&format!("{ROOT_ALIAS}.{}", sort.column), sort.order);
        if sort.column != list.primary_key {
            query = query.order_by(&pk, SortOrder::Asc);
        }
        let data = query
            .limit(pagination.limit)
            .offset(pagination.offset())
            .to_sql()
            .map_err(QueryError::configuration)?;

        Ok(ListStatements { data, count })
    }
}
