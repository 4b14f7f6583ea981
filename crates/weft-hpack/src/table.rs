//! The HPACK header table: the fixed static table followed by the
//! connection's dynamic table, addressed with a single 1-based index.

use std::collections::VecDeque;

use tracing::trace;

/// Every dynamic table entry costs its name and value length plus this.
pub const ENTRY_OVERHEAD: usize = 32;

/// Default dynamic table size, and the initial value of
/// SETTINGS_HEADER_TABLE_SIZE.
pub const DEFAULT_TABLE_SIZE: usize = 4096;

pub type StaticTable = &'static [(&'static [u8], &'static [u8])];

/// RFC 7541, Appendix A
pub static STATIC_TABLE: StaticTable = &[
    (b":authority", b""),
    (b":method", b"GET"),
    (b":method", b"POST"),
    (b":path", b"/"),
    (b":path", b"/index.html"),
    (b":scheme", b"http"),
    (b":scheme", b"https"),
    (b":status", b"200"),
    (b":status", b"204"),
    (b":status", b"206"),
    (b":status", b"304"),
    (b":status", b"400"),
    (b":status", b"404"),
    (b":status", b"500"),
    (b"accept-charset", b""),
    (b"accept-encoding", b"gzip, deflate"),
    (b"accept-language", b""),
    (b"accept-ranges", b""),
    (b"accept", b""),
    (b"access-control-allow-origin", b""),
    (b"age", b""),
    (b"allow", b""),
    (b"authorization", b""),
    (b"cache-control", b""),
    (b"content-disposition", b""),
    (b"content-encoding", b""),
    (b"content-language", b""),
    (b"content-length", b""),
    (b"content-location", b""),
    (b"content-range", b""),
    (b"content-type", b""),
    (b"cookie", b""),
    (b"date", b""),
    (b"etag", b""),
    (b"expect", b""),
    (b"expires", b""),
    (b"from", b""),
    (b"host", b""),
    (b"if-match", b""),
    (b"if-modified-since", b""),
    (b"if-none-match", b""),
    (b"if-range", b""),
    (b"if-unmodified-since", b""),
    (b"last-modified", b""),
    (b"link", b""),
    (b"location", b""),
    (b"max-forwards", b""),
    (b"proxy-authenticate", b""),
    (b"proxy-authorization", b""),
    (b"range", b""),
    (b"referer", b""),
    (b"refresh", b""),
    (b"retry-after", b""),
    (b"server", b""),
    (b"set-cookie", b""),
    (b"strict-transport-security", b""),
    (b"transfer-encoding", b""),
    (b"user-agent", b""),
    (b"vary", b""),
    (b"via", b""),
    (b"www-authenticate", b""),
];

/// Size-bounded, insertion-ordered cache of header fields. The newest entry
/// sits at the front; eviction happens from the back.
pub struct DynamicTable {
    table: VecDeque<(Vec<u8>, Vec<u8>)>,
    size: usize,
    max_size: usize,
}

impl Default for DynamicTable {
    fn default() -> Self {
        Self::with_size(DEFAULT_TABLE_SIZE)
    }
}

impl DynamicTable {
    pub fn with_size(max_size: usize) -> DynamicTable {
        DynamicTable {
            table: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    /// Current size of the table in octets, overhead included.
    pub fn get_size(&self) -> usize {
        self.size
    }

    pub fn get_max_table_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Changes the byte budget, evicting the oldest entries until the table
    /// fits.
    pub fn set_max_table_size(&mut self, new_max_size: usize) {
        self.max_size = new_max_size;
        self.consolidate_table();
    }

    /// Inserts a new entry at the front. An entry larger than the whole
    /// budget empties the table and is not stored.
    pub fn add_header(&mut self, key: Vec<u8>, value: Vec<u8>) {
        let entry_size = key.len() + value.len() + ENTRY_OVERHEAD;
        if entry_size > self.max_size {
            trace!(entry_size, max_size = self.max_size, "entry too large, clearing dynamic table");
            self.table.clear();
            self.size = 0;
            return;
        }

        self.size += entry_size;
        self.table.push_front((key, value));
        self.consolidate_table();
    }

    /// 0-based lookup, newest first.
    pub fn get(&self, index: usize) -> Option<(&[u8], &[u8])> {
        self.table
            .get(index)
            .map(|(name, value)| (&name[..], &value[..]))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.table.iter().map(|(name, value)| (&name[..], &value[..]))
    }

    /// Copies the entries out, newest first.
    pub fn to_vec(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.table.iter().cloned().collect()
    }

    fn consolidate_table(&mut self) {
        while self.size > self.max_size {
            match self.table.pop_back() {
                Some((name, value)) => {
                    self.size -= name.len() + value.len() + ENTRY_OVERHEAD;
                }
                None => break,
            }
        }
    }
}

/// Static table entries come first (indices 1 through 61), then the
/// dynamic table, newest entry first.
pub struct HeaderTable {
    static_table: StaticTable,
    pub dynamic_table: DynamicTable,
}

impl Default for HeaderTable {
    fn default() -> Self {
        Self::with_static_table(STATIC_TABLE)
    }
}

impl HeaderTable {
    pub fn with_static_table(static_table: StaticTable) -> HeaderTable {
        HeaderTable {
            static_table,
            dynamic_table: DynamicTable::default(),
        }
    }

    /// Resolves a 1-based index. Index 0 is never valid.
    pub fn get_from_table(&self, index: usize) -> Option<(&[u8], &[u8])> {
        let real_index = index.checked_sub(1)?;
        if real_index < self.static_table.len() {
            let (name, value) = self.static_table[real_index];
            Some((name, value))
        } else {
            self.dynamic_table
                .get(real_index - self.static_table.len())
        }
    }

    pub fn add_header(&mut self, name: Vec<u8>, value: Vec<u8>) {
        self.dynamic_table.add_header(name, value);
    }

    /// Looks for a field, preferring a full (name and value) match over a
    /// name-only one. Returns the 1-based index and whether the value
    /// matched as well.
    pub fn find_header(&self, header: (&[u8], &[u8])) -> Option<(usize, bool)> {
        let (name, value) = header;
        let mut name_match = None;

        for index in 1..=self.static_table.len() + self.dynamic_table.len() {
            let Some((n, v)) = self.get_from_table(index) else {
                break;
            };
            if n != name {
                continue;
            }
            if v == value {
                return Some((index, true));
            }
            if name_match.is_none() {
                name_match = Some((index, false));
            }
        }

        name_match
    }
}
