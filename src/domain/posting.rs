use serde::Serialize;

pub const COLUMN_COUNT: usize = 24;

/// 批次上傳格式的固定欄位（順序不可變動），星號為必填
pub const POSTING_HEADERS: [&str; COLUMN_COUNT] = [
    "Pickup Earliest*",
    "Pickup Latest",
    "Length (ft)*",
    "Weight (lbs)*",
    "Full/Partial*",
    "Equipment*",
    "Use Private Network*",
    "Private Network Rate",
    "Allow Private Network Booking",
    "Allow Private Network Bidding",
    "Use DAT Loadboard*",
    "DAT Loadboard Rate",
    "Allow DAT Loadboard Booking",
    "Use Extended Network",
    "Contact Method*",
    "Origin City*",
    "Origin State*",
    "Origin Postal Code",
    "Destination City*",
    "Destination State*",
    "Destination Postal Code",
    "Comment",
    "Commodity",
    "Reference ID",
];

pub const REFERENCE_ID_PATTERN: &str = r"^RR\d{5}$";

/// 一列上傳資料。未填的選填欄位保留為空字串，欄位數永遠是 `COLUMN_COUNT`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostingRow {
    pub lane_id: String,
    pub fields: [String; COLUMN_COUNT],
}

impl PostingRow {
    pub fn new(lane_id: impl Into<String>) -> Self {
        Self {
            lane_id: lane_id.into(),
            fields: Default::default(),
        }
    }

    pub fn get(&self, header: &str) -> Option<&str> {
        column_index(header).map(|i| self.fields[i].as_str())
    }

    pub fn set(&mut self, header: &str, value: impl Into<String>) {
        if let Some(i) = column_index(header) {
            self.fields[i] = value.into();
        }
    }

    pub fn reference_id(&self) -> &str {
        &self.fields[COLUMN_COUNT - 1]
    }

    /// 除 Reference ID 之外的內容，用於比較重新展開的結果
    pub fn content_without_reference(&self) -> &[String] {
        &self.fields[..COLUMN_COUNT - 1]
    }
}

pub fn column_index(header: &str) -> Option<usize> {
    POSTING_HEADERS.iter().position(|h| *h == header)
}

pub fn is_required(header: &str) -> bool {
    header.ends_with('*')
}
