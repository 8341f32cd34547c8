use std::cmp::{max, min};

use serde::{Deserialize, Serialize};

use crate::record::{Field, Record};

pub const DEFAULT_PAGE_SIZE: usize = 5;

/// What happens to the current page when the search term changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageResetPolicy {
    /// Jump back to the first page on every new term.
    #[default]
    ResetOnSearch,
    /// Keep the page number. It may point past the last page until
    /// `clamp_page` runs; `render` yields no rows meanwhile.
    Preserve,
}

/// Case-insensitive substring match over every searchable field.
pub fn matches(record: &Record, term: &str) -> bool {
    let needle = term.to_lowercase();
    if needle.is_empty() {
        return true;
    }
    Field::all()
        .into_iter()
        .filter(|field| field.is_searchable())
        .any(|field| record.field_text(field).to_lowercase().contains(&needle))
}

/// Full-list positions of every record matching `term`, in list order.
pub fn filter_indices(records: &[Record], term: &str) -> Vec<usize> {
    records
        .iter()
        .enumerate()
        .filter(|(_, record)| matches(record, term))
        .map(|(index, _)| index)
        .collect()
}

pub fn total_pages(matching: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    matching.div_ceil(page_size)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow<'a> {
    /// Position in the full record list; row actions use this.
    pub index: usize,
    /// Zero-based position on the rendered page.
    pub position: usize,
    pub record: &'a Record,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePage<'a> {
    pub page: usize,
    pub total_pages: usize,
    pub total_matches: usize,
    pub rows: Vec<TableRow<'a>>,
}

impl TablePage<'_> {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn indices(&self) -> Vec<usize> {
        self.rows.iter().map(|row| row.index).collect()
    }
}

#[derive(Debug, Clone)]
pub struct TableView {
    search_term: String,
    page: usize,
    page_size: usize,
    policy: PageResetPolicy,
}

impl Default for TableView {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE, PageResetPolicy::default())
    }
}

impl TableView {
    pub fn new(page_size: usize, policy: PageResetPolicy) -> Self {
        Self {
            search_term: String::new(),
            page: 1,
            page_size: max(page_size, 1),
            policy,
        }
    }

    pub fn search_term(&self) -> &str {
        &self.search_term
    }

    /// 1-based current page.
    pub fn page(&self) -> usize {
        self.page
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn set_search_term(&mut self, term: impl Into<String>) {
        let term = term.into();
        if term == self.search_term {
            return;
        }
        self.search_term = term;
        if self.policy == PageResetPolicy::ResetOnSearch {
            self.page = 1;
        }
    }

    pub fn set_page(&mut self, page: usize) {
        self.page = max(page, 1);
    }

    pub fn next_page(&mut self, records: &[Record]) {
        let pages = self.pages_for(records);
        self.page = min(self.page + 1, max(pages, 1));
    }

    pub fn previous_page(&mut self) {
        self.page = max(self.page.saturating_sub(1), 1);
    }

    /// Pulls the current page back inside the available range, e.g. after a
    /// delete removed the last row of the final page.
    pub fn clamp_page(&mut self, records: &[Record]) {
        let pages = self.pages_for(records);
        self.page = min(self.page, max(pages, 1));
    }

    pub fn render<'a>(&self, records: &'a [Record]) -> TablePage<'a> {
        let matching = filter_indices(records, &self.search_term);
        let total_pages = total_pages(matching.len(), self.page_size);
        let start = (self.page - 1).saturating_mul(self.page_size);
        let rows = matching
            .iter()
            .skip(start)
            .take(self.page_size)
            .enumerate()
            .map(|(position, &index)| TableRow {
                index,
                position,
                record: &records[index],
            })
            .collect();
        TablePage {
            page: self.page,
            total_pages,
            total_matches: matching.len(),
            rows,
        }
    }

    /// Full-list index of the row shown at `position` on the current page.
    pub fn row_index(&self, records: &[Record], position: usize) -> Option<usize> {
        self.render(records)
            .rows
            .get(position)
            .map(|row| row.index)
    }

    fn pages_for(&self, records: &[Record]) -> usize {
        total_pages(filter_indices(records, &self.search_term).len(), self.page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(name: &str, country: &str) -> Record {
        Record {
            name: name.into(),
            email: format!("{}@example.com", name.to_lowercase()),
            phone_number: "9800000000".into(),
            country: country.into(),
            ..Record::default()
        }
    }

    fn numbered(count: usize) -> Vec<Record> {
        (0..count)
            .map(|i| person(&format!("Person {i}"), "Nepal"))
            .collect()
    }

    #[test]
    fn search_is_case_insensitive_substring() {
        let records = vec![person("Asha", "Nepal"), person("Vikram", "India")];
        let mut view = TableView::default();
        view.set_search_term("nepal");
        let page = view.render(&records);
        assert_eq!(page.indices(), vec![0]);
        assert_eq!(page.total_matches, 1);
        assert_eq!(page.total_pages, 1);
    }

    #[test]
    fn picture_payload_is_not_searched() -> anyhow::Result<()> {
        let mut bytes = crate::picture::PNG_SIGNATURE.to_vec();
        bytes.extend_from_slice(b"payload");
        let mut record = person("Nabin", "Nepal");
        record.profile_picture = Some(crate::picture::encode_png_bytes(&bytes)?);
        assert!(!matches(&record, "base64"));
        assert!(matches(&record, "NABIN"));
        Ok(())
    }

    #[test]
    fn twelve_records_paginate_into_three_pages() {
        let records = numbered(12);
        let mut view = TableView::default();

        let first = view.render(&records);
        assert_eq!(first.indices(), vec![0, 1, 2, 3, 4]);
        assert_eq!(first.total_pages, 3);

        view.set_page(3);
        let last = view.render(&records);
        assert_eq!(last.indices(), vec![10, 11]);
        assert_eq!(last.rows[1].position, 1);
    }

    #[test]
    fn no_matches_means_zero_pages() {
        let records = numbered(3);
        let mut view = TableView::default();
        view.set_search_term("atlantis");
        let page = view.render(&records);
        assert!(page.is_empty());
        assert_eq!(page.total_pages, 0);
    }

    #[test]
    fn row_index_reports_full_list_position_under_filter() {
        let mut records = numbered(8);
        records[6].country = "Bhutan".into();
        records[2].country = "Bhutan".into();
        let mut view = TableView::default();
        view.set_search_term("bhutan");
        assert_eq!(view.row_index(&records, 0), Some(2));
        assert_eq!(view.row_index(&records, 1), Some(6));
        assert_eq!(view.row_index(&records, 2), None);
    }

    #[test]
    fn reset_on_search_returns_to_first_page() {
        let records = numbered(12);
        let mut view = TableView::new(5, PageResetPolicy::ResetOnSearch);
        view.set_page(3);
        view.set_search_term("person 1");
        assert_eq!(view.page(), 1);
        assert_eq!(view.render(&records).indices(), vec![1, 10, 11]);
    }

    #[test]
    fn preserve_keeps_page_until_clamped() {
        let records = numbered(12);
        let mut view = TableView::new(5, PageResetPolicy::Preserve);
        view.set_page(3);
        view.set_search_term("person 1");
        assert_eq!(view.page(), 3);
        assert!(view.render(&records).is_empty());

        view.clamp_page(&records);
        assert_eq!(view.page(), 1);
        assert_eq!(view.render(&records).indices(), vec![1, 10, 11]);
    }

    #[test]
    fn navigation_is_clamped() {
        let records = numbered(7);
        let mut view = TableView::default();
        view.previous_page();
        assert_eq!(view.page(), 1);
        view.next_page(&records);
        view.next_page(&records);
        assert_eq!(view.page(), 2);

        let shrunk = numbered(5);
        view.clamp_page(&shrunk);
        assert_eq!(view.page(), 1);
    }
}
