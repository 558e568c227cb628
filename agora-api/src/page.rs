/// Pages count top-level comments only: a page holds `limit` top-level
/// comments along with all of their replies
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PageRequest {
    /// 1-based
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub const DEFAULT_LIMIT: u32 = 20;

    pub fn new(page: u32, limit: u32) -> PageRequest {
        PageRequest { page, limit }
    }

    /// Brings page and limit back into their valid ranges
    pub fn clamped(self, max_limit: u32) -> PageRequest {
        PageRequest {
            page: self.page.max(1),
            limit: self.limit.clamp(1, max_limit.max(1)),
        }
    }

    /// Number of top-level comments before this page
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> PageRequest {
        PageRequest {
            page: 1,
            limit: PageRequest::DEFAULT_LIMIT,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub page: u32,
    pub limit: u32,
    /// Total number of top-level comments
    pub total: u64,
    pub total_pages: u64,
    pub has_more: bool,
}

impl PageMeta {
    pub fn new(req: PageRequest, total: u64) -> PageMeta {
        let limit = u64::from(req.limit.max(1));
        let total_pages = (total + limit - 1) / limit;
        PageMeta {
            page: req.page,
            limit: req.limit,
            total,
            total_pages,
            has_more: u64::from(req.page) < total_pages,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Paginated<T> {
    pub data: T,
    pub meta: PageMeta,
}
