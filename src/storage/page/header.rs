use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, PAGE_SIZE};

// Header page layout (page 0):
//   record_count: u32
//   records at 4 + i * RECORD_SIZE, each:
//     name:         [u8; 32], zero padded
//     root_page_id: i32
const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;
const COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;

pub const MAX_HEADER_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

fn record_count(page: &Page) -> usize {
    LittleEndian::read_u32(&page.data[COUNT_OFFSET..COUNT_OFFSET + 4]) as usize
}

fn record_offset(index: usize) -> usize {
    RECORDS_OFFSET + index * RECORD_SIZE
}

fn name_at(page: &Page, index: usize) -> &[u8] {
    let offset = record_offset(index);
    let name = &page.data[offset..offset + NAME_SIZE];
    let end = name.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
    &name[..end]
}

fn find_record(page: &Page, name: &str) -> Option<usize> {
    (0..record_count(page)).find(|&i| name_at(page, i) == name.as_bytes())
}

/// Look up the root page id recorded for an index name.
pub fn get_record(page: &Page, name: &str) -> Option<PageId> {
    find_record(page, name).map(|i| {
        let offset = record_offset(i) + NAME_SIZE;
        LittleEndian::read_i32(&page.data[offset..offset + 4])
    })
}

/// Add a (name, root_page_id) record. Fails when the name already exists,
/// is too long, or the page is full.
pub fn insert_record(page: &mut Page, name: &str, root_page_id: PageId) -> bool {
    if name.len() > NAME_SIZE || find_record(page, name).is_some() {
        return false;
    }
    let count = record_count(page);
    if count >= MAX_HEADER_RECORDS {
        return false;
    }

    let offset = record_offset(count);
    page.data[offset..offset + NAME_SIZE].fill(0);
    page.data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
    LittleEndian::write_i32(
        &mut page.data[offset + NAME_SIZE..offset + NAME_SIZE + 4],
        root_page_id,
    );
    LittleEndian::write_u32(
        &mut page.data[COUNT_OFFSET..COUNT_OFFSET + 4],
        (count + 1) as u32,
    );
    true
}

/// Update an existing record's root page id. Fails when the name is absent.
pub fn update_record(page: &mut Page, name: &str, root_page_id: PageId) -> bool {
    match find_record(page, name) {
        Some(i) => {
            let offset = record_offset(i) + NAME_SIZE;
            LittleEndian::write_i32(&mut page.data[offset..offset + 4], root_page_id);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::HEADER_PAGE_ID;

    #[test]
    fn test_insert_get_update() {
        let mut page = Page::new(HEADER_PAGE_ID);

        assert!(insert_record(&mut page, "orders_pk", 3));
        assert!(insert_record(&mut page, "orders_date", 9));
        assert_eq!(get_record(&page, "orders_pk"), Some(3));
        assert_eq!(get_record(&page, "orders_date"), Some(9));
        assert_eq!(get_record(&page, "missing"), None);

        assert!(update_record(&mut page, "orders_pk", 17));
        assert_eq!(get_record(&page, "orders_pk"), Some(17));
        assert_eq!(get_record(&page, "orders_date"), Some(9));
    }

    #[test]
    fn test_insert_rejects_duplicates_and_long_names() {
        let mut page = Page::new(HEADER_PAGE_ID);
        assert!(insert_record(&mut page, "idx", 1));
        assert!(!insert_record(&mut page, "idx", 2));
        assert_eq!(get_record(&page, "idx"), Some(1));

        let long_name = "x".repeat(33);
        assert!(!insert_record(&mut page, &long_name, 5));
    }

    #[test]
    fn test_update_missing_fails() {
        let mut page = Page::new(HEADER_PAGE_ID);
        assert!(!update_record(&mut page, "nope", 4));
    }
}
