use serde::Serialize;

use crate::pagination::Pagination;
use crate::value::ObjectValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub total_pages: u64,
}

impl PageInfo {
    pub fn new(pagination: &Pagination, total: u64) -> Self {
        Self {
            page: pagination.page,
            limit: pagination.limit,
            total,
            total_pages: pagination.total_pages(total),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListPage {
    pub items: Vec<ObjectValue>,
    pub pagination: PageInfo,
}

/// `{status, statusCode, data: {items, pagination}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub status: &'static str,
    pub status_code: u16,
    pub data: ListPage,
}

impl ListResponse {
    pub fn success(page: ListPage) -> Self {
        Self {
            status: "success",
            status_code: 200,
            data: page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::DynamicValue;
    use serde_json::json;

    #[test]
    fn envelope_shape() -> anyhow::Result<()> {
        let item: ObjectValue = [
            ("id", DynamicValue::from(1i64)),
            (
                "m",
                DynamicValue::from_seq(vec![
                    [("id", DynamicValue::from("10"))].into_iter().collect::<ObjectValue>().into(),
                    [("id", DynamicValue::from("11"))].into_iter().collect::<ObjectValue>().into(),
                ]),
            ),
        ]
        .into_iter()
        .collect();
        let pagination = Pagination { page: 2, limit: 10 };
        let response = ListResponse::success(ListPage {
            items: vec![item],
            pagination: PageInfo::new(&pagination, 25),
        });

        assert_eq!(
            serde_json::to_value(&response)?,
            json!({
                "status": "success",
                "statusCode": 200,
                "data": {
                    "items": [{"id": 1, "m": [{"id": "10"}, {"id": "11"}]}],
                    "pagination": {"page": 2, "limit": 10, "total": 25, "totalPages": 3}
                }
            })
        );
        Ok(())
    }
}
