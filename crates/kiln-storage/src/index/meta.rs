//! Index meta page: what the index is over and where its root lives.

use kiln_common::page::{PageData, PageId};
use kiln_common::types::KeyType;
use kiln_common::{KilnError, Result};

/// Page number of the meta page; always the first page of an index file.
pub const META_PAGE_NUM: u32 = 1;

/// Maximum stored relation name: 19 bytes plus a NUL terminator.
pub const RELATION_NAME_MAX: usize = 19;

const NAME_AT: usize = 0;
const NAME_LEN: usize = RELATION_NAME_MAX + 1;
const ATTR_OFFSET_AT: usize = NAME_AT + NAME_LEN;
const KEY_TYPE_AT: usize = ATTR_OFFSET_AT + 4;
const ROOT_AT: usize = KEY_TYPE_AT + 4;

/// Decoded meta page contents.
///
/// Layout: `relation_name[20]` (NUL-terminated), `attr_byte_offset: i32`,
/// `key_type: i32` tag, `root_page_num: u32`, all little-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMeta {
    /// Name of the base relation, truncated to 19 bytes.
    pub relation_name: String,
    /// Byte offset of the indexed attribute within a record.
    pub attr_byte_offset: u32,
    /// Datatype of the indexed attribute.
    pub key_type: KeyType,
    /// Current root page number.
    pub root_page_num: u32,
}

impl IndexMeta {
    /// Creates meta contents for a new index.
    pub fn new(
        relation_name: &str,
        attr_byte_offset: usize,
        key_type: KeyType,
        root_page_num: u32,
    ) -> Self {
        let mut name = relation_name.to_string();
        name.truncate(RELATION_NAME_MAX);
        Self {
            relation_name: name,
            attr_byte_offset: attr_byte_offset as u32,
            key_type,
            root_page_num,
        }
    }

    /// Decodes a meta page.
    pub fn parse(page_id: PageId, data: &PageData) -> Result<IndexMeta> {
        let name_bytes = &data[NAME_AT..NAME_AT + NAME_LEN];
        let name_end = name_bytes.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        let relation_name = std::str::from_utf8(&name_bytes[..name_end])
            .map_err(|_| KilnError::PageCorrupted {
                page_id,
                reason: "relation name is not UTF-8".to_string(),
            })?
            .to_string();

        let tag = i32::from_le_bytes([
            data[KEY_TYPE_AT],
            data[KEY_TYPE_AT + 1],
            data[KEY_TYPE_AT + 2],
            data[KEY_TYPE_AT + 3],
        ]);
        let key_type = KeyType::from_tag(tag).ok_or_else(|| KilnError::PageCorrupted {
            page_id,
            reason: format!("unknown key type tag {tag}"),
        })?;

        Ok(IndexMeta {
            relation_name,
            attr_byte_offset: u32::from_le_bytes([
                data[ATTR_OFFSET_AT],
                data[ATTR_OFFSET_AT + 1],
                data[ATTR_OFFSET_AT + 2],
                data[ATTR_OFFSET_AT + 3],
            ]),
            key_type,
            root_page_num: u32::from_le_bytes([
                data[ROOT_AT],
                data[ROOT_AT + 1],
                data[ROOT_AT + 2],
                data[ROOT_AT + 3],
            ]),
        })
    }

    /// Encodes this meta into a page.
    pub fn write_to(&self, data: &mut PageData) {
        data.fill(0);
        let name = self.relation_name.as_bytes();
        let len = name.len().min(RELATION_NAME_MAX);
        data[NAME_AT..NAME_AT + len].copy_from_slice(&name[..len]);
        // byte at NAME_AT + len stays 0: the NUL terminator
        data[ATTR_OFFSET_AT..ATTR_OFFSET_AT + 4]
            .copy_from_slice(&self.attr_byte_offset.to_le_bytes());
        data[KEY_TYPE_AT..KEY_TYPE_AT + 4].copy_from_slice(&self.key_type.tag().to_le_bytes());
        data[ROOT_AT..ROOT_AT + 4].copy_from_slice(&self.root_page_num.to_le_bytes());
    }

    /// Overwrites only the root page number field of a meta page.
    pub fn set_root(data: &mut PageData, root_page_num: u32) {
        data[ROOT_AT..ROOT_AT + 4].copy_from_slice(&root_page_num.to_le_bytes());
    }

    /// Checks the stored identity against constructor arguments.
    pub fn matches(
        &self,
        relation_name: &str,
        attr_byte_offset: usize,
        key_type: KeyType,
    ) -> bool {
        let mut expected = relation_name.to_string();
        expected.truncate(RELATION_NAME_MAX);
        self.relation_name == expected
            && self.attr_byte_offset as usize == attr_byte_offset
            && self.key_type == key_type
    }
}
