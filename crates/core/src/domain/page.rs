use serde::{Deserialize, Serialize};

/// Offset pagination request. `page_number` is 1-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page_number: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page_number: u32, page_size: u32) -> Self {
        Self { page_number, page_size }
    }

    /// Clamps the request into `page_number >= 1` and `1..=max_page_size`.
    pub fn normalized(self, max_page_size: u32) -> Self {
        let max_page_size = max_page_size.max(1);
        Self {
            page_number: self.page_number.max(1),
            page_size: self.page_size.clamp(1, max_page_size),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page_number.saturating_sub(1)) * u64::from(self.page_size)
    }

    pub fn limit(&self) -> u32 {
        self.page_size
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page_number: 1, page_size: 20 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: u64,
    pub page_number: u32,
    pub page_size: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total_count: u64, request: PageRequest) -> Self {
        Self { items, total_count, page_number: request.page_number, page_size: request.page_size }
    }

    pub fn empty(request: PageRequest) -> Self {
        Self::new(Vec::new(), 0, request)
    }

    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total_count.div_ceil(u64::from(self.page_size))
    }

    pub fn has_next_page(&self) -> bool {
        u64::from(self.page_number) < self.total_pages()
    }
}

#[cfg(test)]
mod tests {
    use super::{Page, PageRequest};

    #[test]
    fn normalized_clamps_out_of_range_values() {
        let request = PageRequest::new(0, 500).normalized(100);
        assert_eq!(request, PageRequest::new(1, 100));

        let request = PageRequest::new(3, 0).normalized(100);
        assert_eq!(request, PageRequest::new(3, 1));
    }

    #[test]
    fn offset_is_derived_from_one_based_page_number() {
        assert_eq!(PageRequest::new(1, 20).offset(), 0);
        assert_eq!(PageRequest::new(3, 20).offset(), 40);
    }

    #[test]
    fn total_pages_rounds_up() {
        let page: Page<u8> = Page::new(vec![1, 2], 41, PageRequest::new(1, 20));
        assert_eq!(page.total_pages(), 3);
        assert!(page.has_next_page());

        let last: Page<u8> = Page::new(vec![1], 41, PageRequest::new(3, 20));
        assert!(!last.has_next_page());
    }
}
